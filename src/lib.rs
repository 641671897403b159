//! Crawl-Grid: durable job and pipeline orchestration for crawl sessions
//!
//! This crate implements the grid layer a crawler runs on: a persistent
//! embedded storage engine with named typed collections, a compute executor
//! running named jobs under run policies, and a pipeline executor running
//! ordered stages with cooperative stop. All resumability and once-semantics
//! are expressed as atomic updates on persisted records.

pub mod compute;
pub mod config;
pub mod grid;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod storage;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for grid operations
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not open store at {path} (recovery attempt failed): {source}")]
    StorageOpen {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("Storage directory error for {path}: {source}")]
    StorageIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collection '{collection}' holds {declared} values, requested as {requested}")]
    TypeMismatch {
        collection: String,
        declared: String,
        requested: String,
    },

    #[error("Collection '{collection}' is a {declared}, requested as a {requested}")]
    KindMismatch {
        collection: String,
        declared: String,
        requested: String,
    },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Storage engine is closed")]
    Closed,

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Pipeline worker did not finish: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;

// Re-export commonly used types
pub use compute::{CancelToken, ComputeExecutor, Job};
pub use config::{Config, StorageConfig};
pub use grid::Grid;
pub use pipeline::{PipelineExecutor, Stage};
pub use session::{run_session, CrawlSession, SessionHandle, SessionOptions, SessionOutcome};
pub use state::{JobState, JobStatus, PipelineOutcome, RunPolicy};
pub use storage::{GridMap, GridQueue, GridSet, GridStorage};
