//! Configuration module for Crawl-Grid
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use crawl_grid::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("grid.toml")).unwrap();
//! println!("Grid work directory: {}", config.grid.work_dir);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{CompressionLevel, Config, GridConfig, SessionConfig, StorageConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{validate, validate_grid_config, validate_storage_config};
