//! Integration tests for the grid
//!
//! These tests drive grids on temporary work directories end-to-end. Several
//! grids on one directory (sharing a registry) stand in for cluster nodes; a
//! fresh registry on the same directory stands in for a process restart.

use crawl_grid::config::GridConfig;
use crawl_grid::storage::{
    EngineRegistry, GridStorage, SqliteEngine, StorageEngine, STORE_DIR_NAME, STORE_FILE_NAME,
};
use crawl_grid::{
    run_session, CancelToken, CrawlSession, GridError, Grid, JobStatus, PipelineOutcome,
    RunPolicy, SessionHandle, SessionOptions, Stage, StorageConfig,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Connects a node named `node` to the grid in `dir`
fn connect_node(dir: &TempDir, node: &str, registry: &Arc<EngineRegistry>) -> Grid {
    let mut config = GridConfig::new(dir.path().to_string_lossy());
    config.node_name = Some(node.to_string());
    config.poll_interval_ms = 5;
    Grid::connect_with(&config, &StorageConfig::default(), registry.clone())
        .expect("Failed to connect grid node")
}

/// Connects a single node through its own registry, as a fresh process would
fn connect_fresh(dir: &TempDir) -> Grid {
    connect_node(dir, "node-1", &Arc::new(EngineRegistry::new()))
}

/// Shared context of the pipeline tests
#[derive(Default)]
struct Counters {
    runs: AtomicUsize,
    log: std::sync::Mutex<Vec<String>>,
}

impl Counters {
    fn record(&self, stage: &str) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(stage.to_string());
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

fn counting_stage(name: &'static str) -> Stage<Counters> {
    Stage::new(name, RunPolicy::One, move |ctx: &Counters, _| {
        ctx.record(name);
        Ok(())
    })
}

#[test]
fn test_once_job_runs_once_across_restart() {
    let dir = TempDir::new().unwrap();
    let executions = AtomicUsize::new(0);
    let task = |_: &crawl_grid::CancelToken| -> anyhow::Result<()> {
        executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    let grid = connect_fresh(&dir);
    let first = grid.compute().run_on_one_once("seed-frontier", task).unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    grid.close().unwrap();

    let grid = connect_fresh(&dir);
    let second = grid.compute().run_on_one_once("seed-frontier", task).unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_once_stage_accumulates_across_runs() {
    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let counter = grid.storage().get_map::<u64>("counter").unwrap();

    let stages = || {
        let counter = counter.clone();
        vec![
            counting_stage("a"),
            Stage::new("k", RunPolicy::All, move |_: &Counters, _| {
                counter.update("count", |v| v.map_or(1, |v| v + 1))?;
                Ok(())
            }),
            counting_stage("c"),
            counting_stage("d"),
        ]
    };

    for _ in 0..2 {
        let outcome = grid
            .pipeline()
            .run("accumulate", stages(), Arc::new(Counters::default()))
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
    }

    assert_eq!(counter.get("count").unwrap(), Some(2));
}

#[tokio::test]
async fn test_failure_skips_to_always_stages() {
    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let ctx = Arc::new(Counters::default());

    let stages = vec![
        counting_stage("a"),
        Stage::new("b", RunPolicy::One, |ctx: &Counters, _| {
            ctx.record("b");
            anyhow::bail!("fetch failed")
        }),
        counting_stage("c"),
        counting_stage("d").always(true),
    ];

    let outcome = grid
        .pipeline()
        .run("failing", stages, ctx.clone())
        .await
        .unwrap();

    assert_eq!(outcome, PipelineOutcome::Failed);
    assert!(outcome.is_failure());
    assert_eq!(ctx.log(), vec!["a", "b", "d"]);

    let b = grid
        .compute()
        .get_job_state("failing.b", RunPolicy::One)
        .unwrap()
        .unwrap();
    assert_eq!(b.status, JobStatus::Failed);
    assert_eq!(b.error.as_deref(), Some("fetch failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_stage_is_active() {
    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let ctx = Arc::new(Counters::default());
    let released = Arc::new(AtomicBool::new(false));

    let gate = released.clone();
    let stages = vec![
        counting_stage("a"),
        Stage::new("b", RunPolicy::One, move |ctx: &Counters, _| {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            ctx.record("b");
            Ok(())
        }),
        counting_stage("c"),
        counting_stage("d"),
    ];

    let run = grid.pipeline().run("stoppable", stages, ctx.clone());

    let mut waited = Duration::ZERO;
    while grid.pipeline().get_active_stage("stoppable").unwrap().as_deref() != Some("b") {
        assert!(waited < Duration::from_secs(10), "stage b never became active");
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }

    assert!(grid.pipeline().is_running("stoppable"));
    grid.pipeline().stop(Some("stoppable")).unwrap();
    released.store(true, Ordering::SeqCst);

    let outcome = run.await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Stopped);
    assert!(!outcome.is_success());
    assert!(!outcome.is_failure());
    assert_eq!(ctx.runs.load(Ordering::SeqCst), 2);
    assert_eq!(ctx.log(), vec!["a", "b"]);
    assert_eq!(
        grid.pipeline().get_active_stage("stoppable").unwrap(),
        Some("b".to_string())
    );
}

#[test]
fn test_concurrent_updates_are_not_lost() {
    const THREADS: u64 = 8;
    const UPDATES: u64 = 50;

    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let map = grid.storage().get_map::<u64>("hits").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            let map = map.clone();
            scope.spawn(move || {
                for _ in 0..UPDATES {
                    map.update("page", |v| v.map_or(1, |v| v + 1)).unwrap();
                }
            });
        }
    });

    assert_eq!(map.get("page").unwrap(), Some(THREADS * UPDATES));
}

#[test]
fn test_clean_during_concurrent_use() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(SqliteEngine::open(dir.path(), &StorageConfig::default()).unwrap());
    let storage = GridStorage::new(engine.clone());
    let map = storage.get_map::<u32>("pages").unwrap();
    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let map = map.clone();
            let stop = &stop;
            scope.spawn(move || {
                let mut i = 0u32;
                while !stop.load(Ordering::SeqCst) {
                    let key = format!("{}-{}", worker, i % 20);
                    map.put(&key, &i).expect("put failed during clean");
                    map.get(&key).expect("get failed during clean");
                    i += 1;
                }
            });
        }

        std::thread::sleep(Duration::from_millis(50));
        engine.clean().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::SeqCst);
    });

    assert!(storage.collection_names().unwrap().is_empty());
    assert!(dir.path().join(STORE_DIR_NAME).exists());
}

#[test]
fn test_rename_round_trip() {
    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let storage = grid.storage();

    let mut old = storage.get_map::<String>("old").unwrap();
    old.put("https://example.com/", &"visited".to_string()).unwrap();
    old.put("https://example.org/", &"queued".to_string()).unwrap();
    let before = old.entries().unwrap();

    assert!(!old.rename("new").unwrap());

    let reopened = storage.get_map::<String>("new").unwrap();
    assert_eq!(reopened.entries().unwrap(), before);
    let names = storage.collection_names().unwrap();
    assert!(names.contains(&"new".to_string()));
    assert!(!names.contains(&"old".to_string()));
}

#[test]
fn test_rename_swap_replaces_target() {
    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let storage = grid.storage();

    let current = storage.get_set("processed").unwrap();
    current.add("stale").unwrap();

    let mut next = storage.get_set("processed-next").unwrap();
    next.add("fresh").unwrap();
    assert!(next.rename("processed").unwrap());

    let processed = storage.get_set("processed").unwrap();
    assert!(processed.contains("fresh").unwrap());
    assert!(!processed.contains("stale").unwrap());
    assert!(!storage.has_collection("processed-next").unwrap());
}

#[test]
fn test_recovers_after_unclean_shutdown() {
    let dir = TempDir::new().unwrap();
    let engine = SqliteEngine::open(dir.path(), &StorageConfig::default()).unwrap();
    let storage = GridStorage::new(Arc::new(engine));
    storage
        .get_map::<String>("frontier")
        .unwrap()
        .put("next", &"https://example.com/".to_string())
        .unwrap();
    // Simulate a crash: nothing is flushed, checkpointed or closed
    std::mem::forget(storage);

    let grid = connect_fresh(&dir);
    let frontier = grid.storage().get_map::<String>("frontier").unwrap();
    assert_eq!(
        frontier.get("next").unwrap(),
        Some("https://example.com/".to_string())
    );
}

#[test]
fn test_recovers_damaged_store() {
    let dir = TempDir::new().unwrap();
    let grid = connect_fresh(&dir);
    let pages = grid.storage().get_map::<u32>("pages").unwrap();
    for i in 0..50 {
        pages.put(&format!("https://example.com/{}", i), &i).unwrap();
    }
    grid.compute().run_on_one_once("seed", |_| Ok(())).unwrap();
    grid.close().unwrap();

    // Damage the key index of "pages"; its rows stay readable
    let db_path = dir.path().join(STORE_DIR_NAME).join(STORE_FILE_NAME);
    let (root, page_size): (i64, i64) = {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let root = conn
            .query_row(
                "SELECT rootpage FROM sqlite_master WHERE type = 'index' AND tbl_name = 'grid__pages'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let page_size = conn.query_row("PRAGMA page_size", [], |row| row.get(0)).unwrap();
        (root, page_size)
    };
    let mut bytes = std::fs::read(&db_path).unwrap();
    let start = ((root - 1) * page_size) as usize;
    bytes[start..start + 16].fill(0xFF);
    std::fs::write(&db_path, bytes).unwrap();

    let grid = connect_fresh(&dir);
    let pages = grid.storage().get_map::<u32>("pages").unwrap();
    assert_eq!(pages.size().unwrap(), 50);
    assert_eq!(pages.get("https://example.com/42").unwrap(), Some(42));

    let runs = AtomicUsize::new(0);
    grid.compute()
        .run_on_one_once("seed", |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unrecoverable_store_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join(STORE_DIR_NAME);
    std::fs::create_dir_all(&store).unwrap();
    std::fs::write(store.join(STORE_FILE_NAME), vec![0xAB; 8192]).unwrap();

    let mut config = GridConfig::new(dir.path().to_string_lossy());
    config.node_name = Some("node-1".to_string());
    let result = Grid::connect_with(
        &config,
        &StorageConfig::default(),
        Arc::new(EngineRegistry::new()),
    );
    assert!(matches!(result, Err(GridError::StorageOpen { .. })));
}

#[test]
fn test_one_once_elects_single_node() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::new());
    let nodes: Vec<Grid> = (0..3)
        .map(|i| connect_node(&dir, &format!("node-{}", i), &registry))
        .collect();
    let executions = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        let handles: Vec<_> = nodes
            .iter()
            .map(|node| {
                let executions = &executions;
                scope.spawn(move || {
                    node.compute()
                        .run_on_one_once("init-index", |_| {
                            executions.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(30));
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().status, JobStatus::Completed);
        }
    });

    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[test]
fn test_all_once_runs_once_per_node() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::new());
    let a = connect_node(&dir, "a", &registry);
    let b = connect_node(&dir, "b", &registry);
    let executions = AtomicUsize::new(0);
    let task = |_: &crawl_grid::CancelToken| -> anyhow::Result<()> {
        executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };

    for _ in 0..2 {
        a.compute().run_on_all_once("warm-cache", task).unwrap();
        b.compute().run_on_all_once("warm-cache", task).unwrap();
    }
    assert_eq!(executions.load(Ordering::SeqCst), 2);

    assert_eq!(a.compute().reset_job("warm-cache").unwrap(), 2);
    b.compute().run_on_all_once("warm-cache", task).unwrap();
    assert_eq!(executions.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_across_nodes() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::new());
    let a = connect_node(&dir, "a", &registry);
    let b = connect_node(&dir, "b", &registry);
    let ctx = Arc::new(Counters::default());

    let stages = || {
        vec![
            Stage::new("setup", RunPolicy::OneOnce, |ctx: &Counters, _| {
                std::thread::sleep(Duration::from_millis(20));
                ctx.record("setup");
                Ok(())
            }),
            Stage::new("crawl", RunPolicy::All, |ctx: &Counters, _| {
                ctx.record("crawl");
                Ok(())
            }),
        ]
    };

    let run_a = a.pipeline().run("session", stages(), ctx.clone());
    let run_b = b.pipeline().run("session", stages(), ctx.clone());
    let (outcome_a, outcome_b) = tokio::join!(run_a, run_b);

    assert_eq!(outcome_a.unwrap(), PipelineOutcome::Completed);
    assert_eq!(outcome_b.unwrap(), PipelineOutcome::Completed);

    let log = ctx.log();
    assert_eq!(log.iter().filter(|s| *s == "setup").count(), 1);
    assert_eq!(log.iter().filter(|s| *s == "crawl").count(), 2);
}

/// Per-node context whose init stage takes longer on slow nodes
struct SkewedNode {
    init_delay: Duration,
    cleans: Arc<AtomicUsize>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_stage_after_skewed_stage_runs_once_per_run() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::new());
    let a = connect_node(&dir, "a", &registry);
    let b = connect_node(&dir, "b", &registry);
    let cleans = Arc::new(AtomicUsize::new(0));

    let stages = || {
        vec![
            Stage::new("init", RunPolicy::All, |ctx: &SkewedNode, _| {
                std::thread::sleep(ctx.init_delay);
                Ok(())
            }),
            Stage::new("clean", RunPolicy::One, |ctx: &SkewedNode, _| {
                ctx.cleans.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ]
    };
    let context = |millis| {
        Arc::new(SkewedNode {
            init_delay: Duration::from_millis(millis),
            cleans: cleans.clone(),
        })
    };

    for run in 1..=2 {
        let run_a = a.pipeline().run("session", stages(), context(0));
        let run_b = b.pipeline().run("session", stages(), context(200));
        let (outcome_a, outcome_b) = tokio::join!(run_a, run_b);

        assert_eq!(outcome_a.unwrap(), PipelineOutcome::Completed);
        assert_eq!(outcome_b.unwrap(), PipelineOutcome::Completed);
        assert_eq!(cleans.load(Ordering::SeqCst), run);
    }
}

/// Session whose init is slow on node "b" and whose crawl records the node
struct TwoNodeSession;

impl CrawlSession for TwoNodeSession {
    fn init(&self, handle: &SessionHandle) -> anyhow::Result<()> {
        if handle.node_name() == "b" {
            std::thread::sleep(Duration::from_millis(200));
        }
        Ok(())
    }

    fn crawl(&self, handle: &SessionHandle, _token: &CancelToken) -> anyhow::Result<()> {
        handle.storage().get_set("crawled-by")?.add(handle.node_name())?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_node_does_not_clean_after_crawl_started() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::new());
    let a = connect_node(&dir, "a", &registry);
    let b = connect_node(&dir, "b", &registry);
    a.storage().get_set("stale").unwrap().add("old").unwrap();

    let options = SessionOptions::new("crawl-session").with_clean(true);
    let session = Arc::new(TwoNodeSession);
    let (outcome_a, outcome_b) = tokio::join!(
        run_session(&a, session.clone(), &options),
        run_session(&b, session.clone(), &options)
    );
    assert_eq!(outcome_a.unwrap().exit_code(), 0);
    assert_eq!(outcome_b.unwrap().exit_code(), 0);

    let storage = a.storage();
    assert!(!storage.has_collection("stale").unwrap());
    let crawled = storage.get_set("crawled-by").unwrap();
    assert!(crawled.contains("a").unwrap());
    assert!(crawled.contains("b").unwrap());
}

#[test]
fn test_engine_closes_with_last_node() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(EngineRegistry::new());
    let a = connect_node(&dir, "a", &registry);
    let b = connect_node(&dir, "b", &registry);
    let engine = a.storage().engine().clone();

    a.close().unwrap();
    assert!(!engine.is_closed());
    drop(b);
    assert!(engine.is_closed());
    assert_eq!(registry.open_engines(), 0);
}
