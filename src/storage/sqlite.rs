//! SQLite storage engine
//!
//! This module provides the embedded SQLite implementation of the
//! `StorageEngine` trait: one database file per work directory, one table per
//! collection, WAL journaling, and a single connection guarded by an
//! engine-wide lock.

use crate::config::StorageConfig;
use crate::storage::schema::{
    collection_name, create_collection_sql, initialize_schema, table_name, REGISTRY_TABLE,
};
use crate::storage::traits::{CollectionInfo, CollectionKind, RawMerge, StorageEngine};
use crate::{GridError, GridResult};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// Directory created under the work directory to hold the store
pub const STORE_DIR_NAME: &str = "datastore";

/// Database file name inside the store directory
pub const STORE_FILE_NAME: &str = "grid.db";

/// How long a statement waits on a lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// SQLite storage engine
pub struct SqliteEngine {
    conn: SharedConnection,
    store_dir: Option<PathBuf>,
    config: StorageConfig,
    session_id: String,
    committer: Mutex<Option<AutoCommitter>>,
}

impl SqliteEngine {
    /// Opens (or creates) the store under `work_dir`
    ///
    /// # Arguments
    ///
    /// * `work_dir` - Grid work directory; the store lives in `<work_dir>/datastore`
    /// * `config` - Storage tuning options
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteEngine)` - Store opened, possibly after one recovery attempt
    /// * `Err(GridError::StorageIo)` - The store directory could not be created
    /// * `Err(GridError::StorageOpen)` - The store could not be opened even in recovery mode
    pub fn open(work_dir: &Path, config: &StorageConfig) -> GridResult<Self> {
        let store_dir = if config.ephemeral {
            None
        } else {
            Some(work_dir.join(STORE_DIR_NAME))
        };

        let conn = open_store(store_dir.as_deref(), config)?;
        let session_id = Uuid::new_v4().to_string();

        match &store_dir {
            Some(dir) => tracing::info!(
                "Storage engine opened at {} (session {})",
                dir.display(),
                session_id
            ),
            None => tracing::info!("Ephemeral storage engine opened (session {})", session_id),
        }
        tracing::debug!(
            "Storage options: compression={:?}, cache_concurrency={:?}",
            config.compression_level(),
            config.cache_concurrency
        );

        let conn = Arc::new(Mutex::new(Some(conn)));

        let committer = match (&store_dir, config.auto_commit_delay) {
            (Some(_), Some(delay)) if delay > 0 => Some(
                AutoCommitter::spawn(conn.clone(), Duration::from_millis(delay)).map_err(
                    |source| GridError::StorageIo {
                        path: work_dir.to_path_buf(),
                        source,
                    },
                )?,
            ),
            _ => None,
        };

        Ok(Self {
            conn,
            store_dir,
            config: config.clone(),
            session_id,
            committer: Mutex::new(committer),
        })
    }

    /// Creates an ephemeral engine (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> GridResult<Self> {
        Self::open(Path::new("."), &StorageConfig::ephemeral())
    }

    /// Directory holding the store files, or None when ephemeral
    pub fn store_dir(&self) -> Option<&Path> {
        self.store_dir.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> GridResult<T>) -> GridResult<T> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(GridError::Closed)?;
        f(conn)
    }

    /// Runs a content operation against a collection table
    ///
    /// If the table no longer exists (dropped or cleaned underneath an open
    /// handle), `fallback` is returned instead of an error.
    fn with_table<T>(
        &self,
        collection: &str,
        fallback: T,
        f: impl FnOnce(&mut Connection, &str) -> GridResult<T>,
    ) -> GridResult<T> {
        self.with_conn(|conn| {
            let table = table_name(collection);
            match f(conn, &table) {
                Err(GridError::Database(e)) if is_missing_table(&e) => {
                    tracing::debug!(
                        "Collection '{}' no longer exists, operation ignored",
                        collection
                    );
                    Ok(fallback)
                }
                other => other,
            }
        })
    }

    /// Commits and optionally compacts the store before closing
    fn compact(&self, conn: &Connection) -> GridResult<()> {
        if self.store_dir.is_none() {
            return Ok(());
        }

        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;

        if let Some(rate) = self.config.auto_compact_fill_rate {
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let free_pages: i64 =
                conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
            let fill_rate = if page_count == 0 {
                100
            } else {
                (page_count - free_pages) * 100 / page_count
            };
            if fill_rate < i64::from(rate) {
                tracing::info!("Compacting data store (fill rate {}%)...", fill_rate);
                conn.execute_batch("VACUUM;")?;
            }
        }
        Ok(())
    }
}

impl StorageEngine for SqliteEngine {
    // ===== Engine Lifecycle =====

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn clean(&self) -> GridResult<bool> {
        let mut guard = self.lock();
        let conn = guard.take().ok_or(GridError::Closed)?;

        let names = list_names(&conn)?;
        let had_collections = !names.is_empty();
        for name in &names {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table_name(name)))?;
        }
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", REGISTRY_TABLE))?;

        let fresh = match &self.store_dir {
            Some(dir) => {
                conn.close().map_err(|(_, e)| GridError::Database(e))?;
                std::fs::remove_dir_all(dir).map_err(|source| GridError::StorageIo {
                    path: dir.clone(),
                    source,
                })?;
                open_store(Some(dir), &self.config)?
            }
            None => {
                initialize_schema(&conn)?;
                conn
            }
        };
        *guard = Some(fresh);

        tracing::info!("Storage engine cleaned ({} collections dropped)", names.len());
        Ok(had_collections)
    }

    fn close(&self) -> GridResult<()> {
        let committer = self
            .committer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(committer) = committer {
            committer.stop();
        }

        let mut guard = self.lock();
        let Some(conn) = guard.take() else {
            return Ok(());
        };

        tracing::info!("Closing storage engine...");
        self.compact(&conn)?;
        conn.close().map_err(|(_, e)| GridError::Database(e))?;
        tracing::info!("Storage engine closed.");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    // ===== Collection Catalog =====

    fn open_collection(
        &self,
        name: &str,
        kind: CollectionKind,
        value_type: &str,
    ) -> GridResult<()> {
        self.with_conn(|conn| {
            if let Some(info) = registry_entry(conn, name)? {
                if info.kind != kind {
                    return Err(GridError::KindMismatch {
                        collection: name.to_string(),
                        declared: info.kind.to_string(),
                        requested: kind.to_string(),
                    });
                }
                if info.value_type != value_type {
                    return Err(GridError::TypeMismatch {
                        collection: name.to_string(),
                        declared: info.value_type,
                        requested: value_type.to_string(),
                    });
                }
            }

            let tx = conn.transaction()?;
            tx.execute_batch(&create_collection_sql(name))?;
            tx.execute(
                "INSERT OR IGNORE INTO grid_collection_types (name, kind, value_type)
                 VALUES (?1, ?2, ?3)",
                params![name, kind.as_str(), value_type],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn rename_collection(&self, name: &str, new_name: &str) -> GridResult<bool> {
        if name == new_name {
            return Ok(true);
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !table_exists(&tx, name)? {
                return Err(GridError::UnknownCollection(name.to_string()));
            }

            let existed = table_exists(&tx, new_name)?;
            if existed {
                tx.execute_batch(&format!("DROP TABLE {};", table_name(new_name)))?;
            }
            tx.execute_batch(&format!(
                "ALTER TABLE {} RENAME TO {};",
                table_name(name),
                table_name(new_name)
            ))?;
            tx.execute(
                "DELETE FROM grid_collection_types WHERE name = ?1",
                params![new_name],
            )?;
            tx.execute(
                "UPDATE grid_collection_types SET name = ?1 WHERE name = ?2",
                params![new_name, name],
            )?;
            tx.commit()?;

            tracing::debug!("Renamed collection '{}' to '{}'", name, new_name);
            Ok(existed)
        })
    }

    fn drop_collection(&self, name: &str) -> GridResult<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existed = table_exists(&tx, name)?;
            if existed {
                tx.execute_batch(&format!("DROP TABLE {};", table_name(name)))?;
            }
            tx.execute(
                "DELETE FROM grid_collection_types WHERE name = ?1",
                params![name],
            )?;
            tx.commit()?;
            Ok(existed)
        })
    }

    fn has_collection(&self, name: &str) -> GridResult<bool> {
        self.with_conn(|conn| Ok(table_exists(conn, name)?))
    }

    fn collection_info(&self, name: &str) -> GridResult<Option<CollectionInfo>> {
        self.with_conn(|conn| registry_entry(conn, name))
    }

    fn list_collection_names(&self) -> GridResult<Vec<String>> {
        self.with_conn(|conn| list_names(conn))
    }

    // ===== Content =====

    fn get(&self, collection: &str, key: &str) -> GridResult<Option<String>> {
        self.with_table(collection, None, |conn, table| {
            let value = conn
                .query_row(
                    &format!("SELECT value FROM {} WHERE key = ?1", table),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    fn put(&self, collection: &str, key: &str, value: &str) -> GridResult<()> {
        self.with_table(collection, (), |conn, table| {
            conn.execute(&upsert_sql(table), params![key, value])?;
            Ok(())
        })
    }

    fn put_if_absent(&self, collection: &str, key: &str, value: &str) -> GridResult<bool> {
        self.with_table(collection, false, |conn, table| {
            let inserted = conn.execute(
                &format!("INSERT OR IGNORE INTO {} (key, value) VALUES (?1, ?2)", table),
                params![key, value],
            )?;
            Ok(inserted > 0)
        })
    }

    fn remove(&self, collection: &str, key: &str) -> GridResult<bool> {
        self.with_table(collection, false, |conn, table| {
            let removed =
                conn.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])?;
            Ok(removed > 0)
        })
    }

    fn contains(&self, collection: &str, key: &str) -> GridResult<bool> {
        self.with_table(collection, false, |conn, table| {
            let found = conn
                .query_row(
                    &format!("SELECT 1 FROM {} WHERE key = ?1", table),
                    params![key],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn count(&self, collection: &str) -> GridResult<u64> {
        self.with_table(collection, 0, |conn, table| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn clear(&self, collection: &str) -> GridResult<()> {
        self.with_table(collection, (), |conn, table| {
            conn.execute(&format!("DELETE FROM {}", table), [])?;
            Ok(())
        })
    }

    fn update(
        &self,
        collection: &str,
        key: &str,
        merge: Box<RawMerge<'_>>,
    ) -> GridResult<Option<String>> {
        self.with_table(collection, None, |conn, table| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current: Option<String> = tx
                .query_row(
                    &format!("SELECT value FROM {} WHERE key = ?1", table),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            let next = merge(current)?;
            match &next {
                Some(value) => {
                    tx.execute(&upsert_sql(table), params![key, value])?;
                }
                None => {
                    tx.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])?;
                }
            }
            tx.commit()?;
            Ok(next)
        })
    }

    fn entries(&self, collection: &str) -> GridResult<Vec<(String, String)>> {
        self.with_table(collection, Vec::new(), |conn, table| {
            let mut stmt = conn.prepare(&format!("SELECT key, value FROM {} ORDER BY id", table))?;
            let entries = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }

    fn first(&self, collection: &str) -> GridResult<Option<(String, String)>> {
        self.with_table(collection, None, |conn, table| {
            let entry = conn
                .query_row(
                    &format!("SELECT key, value FROM {} ORDER BY id LIMIT 1", table),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(entry)
        })
    }

    fn pop_first(&self, collection: &str) -> GridResult<Option<(String, String)>> {
        self.with_table(collection, None, |conn, table| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let entry: Option<(i64, String, String)> = tx
                .query_row(
                    &format!("SELECT id, key, value FROM {} ORDER BY id LIMIT 1", table),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            if let Some((id, _, _)) = &entry {
                tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])?;
            }
            tx.commit()?;
            Ok(entry.map(|(_, key, value)| (key, value)))
        })
    }
}

impl Drop for SqliteEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Storage engine did not close cleanly: {}", e);
        }
    }
}

/// Periodically checkpoints the write-ahead log into the main database file
struct AutoCommitter {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl AutoCommitter {
    fn spawn(conn: SharedConnection, delay: Duration) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("grid-auto-commit".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {
                        let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(conn) = guard.as_ref() {
                            if let Err(e) =
                                conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
                            {
                                tracing::warn!("Periodic store commit failed: {}", e);
                            }
                        }
                    }
                    _ => break,
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            tracing::warn!("Auto-commit thread panicked");
        }
    }
}

/// Opens the store, retrying once in recovery mode
fn open_store(store_dir: Option<&Path>, config: &StorageConfig) -> GridResult<Connection> {
    let Some(dir) = store_dir else {
        return open_connection(None, config).map_err(|source| GridError::StorageOpen {
            path: PathBuf::from(":memory:"),
            source,
        });
    };

    std::fs::create_dir_all(dir).map_err(|source| GridError::StorageIo {
        path: dir.to_path_buf(),
        source,
    })?;
    let db_path = dir.join(STORE_FILE_NAME);

    match open_connection(Some(&db_path), config) {
        Ok(conn) => Ok(conn),
        Err(e) => {
            tracing::warn!(
                "An error occurred while opening the store at {}: {}. \
                 This can happen after an abnormal shutdown of a previous session. \
                 An attempt will be made to recover. Back up the store directory \
                 if you want to preserve the crawl history.",
                db_path.display(),
                e
            );
            discard_shared_memory_index(&db_path);
            let salvaged = salvage_store(&db_path)?;
            let conn = open_connection(Some(&db_path), config).map_err(|source| {
                GridError::StorageOpen {
                    path: db_path.clone(),
                    source,
                }
            })?;
            tracing::warn!(
                "Store recovery appears to be successful ({} entries salvaged).",
                salvaged
            );
            Ok(conn)
        }
    }
}

/// Rebuilds the store at `db_path` from every row that can still be read
///
/// The damaged file is kept next to the new one with a `.corrupt` suffix.
/// Returns the number of collection entries carried over.
fn salvage_store(db_path: &Path) -> GridResult<usize> {
    let salvage_path = sibling_path(db_path, ".salvage");
    let corrupt_path = sibling_path(db_path, ".corrupt");
    remove_if_present(&salvage_path)?;

    let salvaged = match copy_readable_rows(db_path, &salvage_path) {
        Ok(salvaged) => salvaged,
        Err(source) => {
            let _ = std::fs::remove_file(&salvage_path);
            return Err(GridError::StorageOpen {
                path: db_path.to_path_buf(),
                source,
            });
        }
    };

    remove_if_present(&corrupt_path)?;
    std::fs::rename(db_path, &corrupt_path).map_err(|source| GridError::StorageIo {
        path: db_path.to_path_buf(),
        source,
    })?;
    remove_if_present(&sibling_path(db_path, "-wal"))?;
    remove_if_present(&sibling_path(db_path, "-shm"))?;
    std::fs::rename(&salvage_path, db_path).map_err(|source| GridError::StorageIo {
        path: salvage_path.clone(),
        source,
    })?;

    tracing::warn!("Damaged store kept at {}", corrupt_path.display());
    Ok(salvaged)
}

/// Copies the registry and every collection table into a fresh database,
/// stopping at the first unreadable row of each table
fn copy_readable_rows(source_path: &Path, target_path: &Path) -> rusqlite::Result<usize> {
    let source = Connection::open(source_path)?;
    let mut target = Connection::open(target_path)?;
    initialize_schema(&target)?;

    let tables: Vec<String> = {
        let mut stmt = source.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        names
    };

    let tx = target.transaction()?;
    if tables.iter().any(|t| t == REGISTRY_TABLE) {
        copy_rows(
            &source,
            &tx,
            "SELECT name, kind, value_type FROM grid_collection_types",
            "INSERT OR IGNORE INTO grid_collection_types (name, kind, value_type) VALUES (?1, ?2, ?3)",
            3,
        );
    }

    let mut salvaged = 0;
    for collection in tables.iter().filter_map(|t| collection_name(t)) {
        let table = table_name(collection);
        tx.execute_batch(&create_collection_sql(collection))?;
        let copied = copy_rows(
            &source,
            &tx,
            &format!("SELECT key, value FROM {} ORDER BY id", table),
            &format!("INSERT OR IGNORE INTO {} (key, value) VALUES (?1, ?2)", table),
            2,
        );
        tracing::debug!("Salvaged {} entries of collection '{}'", copied, collection);
        salvaged += copied;
    }
    tx.commit()?;

    Ok(salvaged)
}

/// Copies text rows of `columns` columns until the source stops yielding them
fn copy_rows(
    source: &Connection,
    target: &Connection,
    select: &str,
    insert: &str,
    columns: usize,
) -> usize {
    let result = (|| -> rusqlite::Result<usize> {
        let mut read = source.prepare(select)?;
        let mut write = target.prepare(insert)?;
        let mut rows = read.query([])?;
        let mut copied = 0;

        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Stopped salvaging after {} rows: {}", copied, e);
                    break;
                }
            };
            let values = match (0..columns)
                .map(|i| row.get::<_, String>(i))
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!("Stopped salvaging at an unreadable row: {}", e);
                    break;
                }
            };
            write.execute(rusqlite::params_from_iter(values.iter()))?;
            copied += 1;
        }
        Ok(copied)
    })();

    result.unwrap_or_else(|e| {
        tracing::warn!("Could not salvage rows ({}): {}", select, e);
        0
    })
}

fn sibling_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut path = db_path.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn remove_if_present(path: &Path) -> GridResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(GridError::StorageIo {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Opens a connection, applies tuning options and verifies store integrity
fn open_connection(db_path: Option<&Path>, config: &StorageConfig) -> rusqlite::Result<Connection> {
    let conn = match db_path {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;

    // Page size only applies before the first table is written
    if let Some(size) = config.page_split_size {
        let page_size = size
            .checked_next_power_of_two()
            .unwrap_or(65536)
            .clamp(512, 65536);
        conn.execute_batch(&format!("PRAGMA page_size = {};", page_size))?;
    }

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    if let Some(bytes) = config.cache_size {
        let kib = (bytes / 1024).max(1);
        conn.execute_batch(&format!("PRAGMA cache_size = -{};", kib))?;
    }

    if config.auto_commit_delay == Some(0) {
        conn.execute_batch("PRAGMA wal_autocheckpoint = 0;")?;
    } else if let Some(bytes) = config.auto_commit_buffer_size {
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        let pages = (bytes as i64 / page_size.max(1)).max(1);
        conn.execute_batch(&format!("PRAGMA wal_autocheckpoint = {};", pages))?;
    }

    let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if check != "ok" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            Some(check),
        ));
    }

    initialize_schema(&conn)?;
    Ok(conn)
}

/// Removes the shared-memory WAL index, which SQLite rebuilds from the log
fn discard_shared_memory_index(db_path: &Path) {
    match std::fs::remove_file(sibling_path(db_path, "-shm")) {
        Ok(()) => tracing::debug!("Discarded shared-memory index of {}", db_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Could not discard shared-memory index: {}", e),
    }
}

fn is_missing_table(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table"))
}

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        table
    )
}

fn table_exists(conn: &Connection, collection: &str) -> rusqlite::Result<bool> {
    let physical = format!("{}{}", crate::storage::schema::COLLECTION_TABLE_PREFIX, collection);
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![physical],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn list_names(conn: &Connection) -> GridResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(tables
        .iter()
        .filter_map(|table| collection_name(table))
        .map(str::to_string)
        .collect())
}

fn registry_entry(conn: &Connection, name: &str) -> GridResult<Option<CollectionInfo>> {
    let entry = conn
        .query_row(
            "SELECT kind, value_type FROM grid_collection_types WHERE name = ?1",
            params![name],
            |row| {
                Ok(CollectionInfo {
                    name: name.to_string(),
                    kind: CollectionKind::parse(&row.get::<_, String>(0)?)
                        .unwrap_or(CollectionKind::Map),
                    value_type: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}
