use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Crawl-Grid
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Grid node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    /// Directory holding the grid's persistent store
    #[serde(rename = "work-dir")]
    pub work_dir: String,

    /// Name this node uses for per-node job records (defaults to "node-<pid>")
    #[serde(rename = "node-name", default)]
    pub node_name: Option<String>,

    /// Interval at which a losing contender polls for a job outcome (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl GridConfig {
    /// Creates a grid configuration for the given work directory with defaults
    pub fn new(work_dir: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            node_name: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    /// Returns the configured node name, or one derived from the process id
    pub fn resolved_node_name(&self) -> String {
        self.node_name
            .clone()
            .unwrap_or_else(|| format!("node-{}", std::process::id()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Storage engine tuning options
///
/// Every option is optional; an unset option keeps the engine default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Page size in bytes
    #[serde(rename = "page-split-size", default)]
    pub page_split_size: Option<u32>,

    /// Compression level: 0 none, 1 low, 2 high
    #[serde(default)]
    pub compress: Option<u8>,

    /// Number of concurrent cache segments
    #[serde(rename = "cache-concurrency", default)]
    pub cache_concurrency: Option<u32>,

    /// Read cache size in bytes
    #[serde(rename = "cache-size", default)]
    pub cache_size: Option<u64>,

    /// Compact on close when the fill rate (percent) drops below this value
    #[serde(rename = "auto-compact-fill-rate", default)]
    pub auto_compact_fill_rate: Option<u8>,

    /// Size in bytes of uncommitted changes after which a commit is forced
    #[serde(rename = "auto-commit-buffer-size", default)]
    pub auto_commit_buffer_size: Option<u64>,

    /// Delay between periodic commits (milliseconds). 0 disables auto-commit.
    #[serde(rename = "auto-commit-delay", default)]
    pub auto_commit_delay: Option<u64>,

    /// Keep the store in memory only; everything is discarded on close
    #[serde(default)]
    pub ephemeral: bool,
}

impl StorageConfig {
    /// An in-memory configuration, mostly useful for tests and troubleshooting
    pub fn ephemeral() -> Self {
        Self {
            ephemeral: true,
            ..Default::default()
        }
    }

    pub fn compression_level(&self) -> CompressionLevel {
        match self.compress {
            Some(1) => CompressionLevel::Low,
            Some(2) => CompressionLevel::High,
            _ => CompressionLevel::None,
        }
    }
}

/// Compression levels recognized by the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Low,
    High,
}

/// Crawl session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Name of the pipeline the host runs once per session
    #[serde(rename = "pipeline-name", default = "default_pipeline_name")]
    pub pipeline_name: String,
}

fn default_pipeline_name() -> String {
    "crawl-session".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
        }
    }
}
