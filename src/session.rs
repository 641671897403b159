//! Crawl session collaboration
//!
//! A crawl host implements `CrawlSession` and hands it to `run_session`, which
//! runs one pipeline per session: init, an optional clean, the crawl itself
//! and a shutdown stage that runs no matter what. The pipeline outcome maps
//! to the host's process exit code.

use crate::compute::CancelToken;
use crate::config::SessionConfig;
use crate::grid::Grid;
use crate::pipeline::{PipelineExecutor, Stage};
use crate::state::{PipelineOutcome, RunPolicy};
use crate::storage::{is_reserved, GridStorage};
use crate::GridResult;
use std::sync::Arc;

/// What the session hooks can reach while the session pipeline runs
#[derive(Clone)]
pub struct SessionHandle {
    storage: GridStorage,
    pipeline: PipelineExecutor,
    pipeline_name: String,
    node_name: String,
}

impl SessionHandle {
    pub fn storage(&self) -> &GridStorage {
        &self.storage
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// True once someone asked the session pipeline to stop
    ///
    /// Long crawl loops check this to wind down early; the pipeline itself
    /// only acts on the request between stages.
    pub fn is_stop_requested(&self) -> GridResult<bool> {
        self.pipeline.is_stop_requested(&self.pipeline_name)
    }
}

/// Hooks a crawl host provides for one session
pub trait CrawlSession: Send + Sync + 'static {
    /// Prepares this node for crawling. Runs on every node.
    fn init(&self, _handle: &SessionHandle) -> anyhow::Result<()> {
        Ok(())
    }

    /// Forgets the previous session's crawl data. Runs on one node, and only
    /// when a clean start was requested.
    ///
    /// The default drops every collection except the grid's own.
    fn clean(&self, handle: &SessionHandle) -> anyhow::Result<()> {
        drop_session_collections(handle.storage())?;
        Ok(())
    }

    /// Crawls. Runs on every node.
    fn crawl(&self, handle: &SessionHandle, token: &CancelToken) -> anyhow::Result<()>;

    /// Releases resources. Runs on every node, even after a failure or stop.
    fn shutdown(&self, _handle: &SessionHandle) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Drops every collection except the grid's own bookkeeping
///
/// Returns the number of collections dropped.
pub fn drop_session_collections(storage: &GridStorage) -> GridResult<usize> {
    let mut dropped = 0;
    for name in storage.collection_names()? {
        if !is_reserved(&name) && storage.drop_collection(&name)? {
            tracing::debug!("Dropped collection '{}'", name);
            dropped += 1;
        }
    }
    tracing::info!("Dropped {} session collections", dropped);
    Ok(dropped)
}

/// Options of one session run
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub pipeline_name: String,
    /// Run the clean stage before crawling
    pub clean: bool,
}

impl SessionOptions {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            clean: false,
        }
    }

    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self::new(config.pipeline_name.clone())
    }
}

/// Terminal result of a session, as the host reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome(pub PipelineOutcome);

impl SessionOutcome {
    /// Process exit code: a stopped session is not an error
    pub fn exit_code(&self) -> u8 {
        match self.0 {
            PipelineOutcome::Completed | PipelineOutcome::Stopped => 0,
            PipelineOutcome::Failed => 1,
        }
    }
}

struct SessionRun<S> {
    session: Arc<S>,
    handle: SessionHandle,
    clean: bool,
}

fn session_stages<S: CrawlSession>() -> Vec<Stage<SessionRun<S>>> {
    vec![
        Stage::new("init", RunPolicy::All, |run: &SessionRun<S>, _| {
            run.session.init(&run.handle)
        }),
        Stage::new("clean", RunPolicy::One, |run: &SessionRun<S>, _| {
            run.session.clean(&run.handle)
        })
        .only_if(|run: &SessionRun<S>| run.clean),
        Stage::new("crawl", RunPolicy::All, |run: &SessionRun<S>, token| {
            run.session.crawl(&run.handle, token)
        }),
        Stage::new("shutdown", RunPolicy::All, |run: &SessionRun<S>, _| {
            run.session.shutdown(&run.handle)
        })
        .always(true),
    ]
}

/// Runs one crawl session on this node
pub async fn run_session<S: CrawlSession>(
    grid: &Grid,
    session: Arc<S>,
    options: &SessionOptions,
) -> GridResult<SessionOutcome> {
    let handle = SessionHandle {
        storage: grid.storage().clone(),
        pipeline: grid.pipeline().clone(),
        pipeline_name: options.pipeline_name.clone(),
        node_name: grid.node_name().to_string(),
    };
    let run = Arc::new(SessionRun {
        session,
        handle,
        clean: options.clean,
    });

    tracing::info!(
        "Starting crawl session '{}' on node '{}'{}",
        options.pipeline_name,
        grid.node_name(),
        if options.clean { " (clean start)" } else { "" }
    );

    let outcome = grid
        .pipeline()
        .run(options.pipeline_name.clone(), session_stages::<S>(), run)
        .await?;

    tracing::info!("Crawl session '{}' ended: {}", options.pipeline_name, outcome);
    Ok(SessionOutcome(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSession {
        calls: Mutex<Vec<&'static str>>,
        fail_crawl: bool,
    }

    impl RecordingSession {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CrawlSession for RecordingSession {
        fn init(&self, handle: &SessionHandle) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("init");
            handle.storage().get_set("visited")?.add("https://example.com/")?;
            Ok(())
        }

        fn clean(&self, handle: &SessionHandle) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("clean");
            drop_session_collections(handle.storage())?;
            Ok(())
        }

        fn crawl(&self, _handle: &SessionHandle, _token: &CancelToken) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("crawl");
            if self.fail_crawl {
                anyhow::bail!("crawler crashed");
            }
            Ok(())
        }

        fn shutdown(&self, _handle: &SessionHandle) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("shutdown");
            Ok(())
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SessionOutcome(PipelineOutcome::Completed).exit_code(), 0);
        assert_eq!(SessionOutcome(PipelineOutcome::Stopped).exit_code(), 0);
        assert_eq!(SessionOutcome(PipelineOutcome::Failed).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_session_without_clean() {
        let dir = TempDir::new().unwrap();
        let grid = Grid::connect(dir.path(), &StorageConfig::default()).unwrap();
        let session = Arc::new(RecordingSession::default());

        let outcome = run_session(&grid, session.clone(), &SessionOptions::new("session"))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(session.calls(), vec!["init", "crawl", "shutdown"]);
        assert!(grid.storage().has_collection("visited").unwrap());
    }

    #[tokio::test]
    async fn test_clean_session_drops_crawl_data() {
        let dir = TempDir::new().unwrap();
        let grid = Grid::connect(dir.path(), &StorageConfig::default()).unwrap();
        grid.storage().get_map::<u32>("old-pages").unwrap().put("a", &1).unwrap();

        let session = Arc::new(RecordingSession::default());
        let options = SessionOptions::new("session").with_clean(true);
        run_session(&grid, session.clone(), &options).await.unwrap();

        assert_eq!(session.calls(), vec!["init", "clean", "crawl", "shutdown"]);
        assert!(!grid.storage().has_collection("old-pages").unwrap());
        // init ran before clean
        assert!(!grid.storage().has_collection("visited").unwrap());
    }

    #[tokio::test]
    async fn test_failed_crawl_still_shuts_down() {
        let dir = TempDir::new().unwrap();
        let grid = Grid::connect(dir.path(), &StorageConfig::default()).unwrap();
        let session = Arc::new(RecordingSession {
            fail_crawl: true,
            ..Default::default()
        });

        let outcome = run_session(&grid, session.clone(), &SessionOptions::new("session"))
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome(PipelineOutcome::Failed));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(session.calls(), vec!["init", "crawl", "shutdown"]);
    }

    #[test]
    fn test_default_clean_keeps_grid_collections() {
        struct Minimal;
        impl CrawlSession for Minimal {
            fn crawl(&self, _: &SessionHandle, _: &CancelToken) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let grid = Grid::connect(dir.path(), &StorageConfig::default()).unwrap();
        grid.storage().get_set("frontier").unwrap();
        let handle = SessionHandle {
            storage: grid.storage().clone(),
            pipeline: grid.pipeline().clone(),
            pipeline_name: "session".to_string(),
            node_name: grid.node_name().to_string(),
        };

        Minimal.clean(&handle).unwrap();
        let names = grid.storage().collection_names().unwrap();
        assert!(!names.contains(&"frontier".to_string()));
        assert!(names.iter().all(|n| is_reserved(n)));
        assert!(!names.is_empty());
    }
}
