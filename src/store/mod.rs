use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct LocalStoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for LocalStoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER
        )",
        [],
    )
    .context("failed to create kv_entries table")?;
    Ok(())
}

/// Persistent local key/value store with per-entry expiry.
///
/// Values are JSON documents under namespaced string keys. An entry with an
/// `expires_at` in the past is treated as absent on read. All SQLite access
/// happens on a dedicated worker thread; callers await replies over a
/// oneshot channel.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<LocalStoreInner>,
    db_path: Arc<PathBuf>,
}

impl LocalStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create store directory {}", parent.display())
                })?;
            }
        }
        Self::spawn_worker(db_path)
    }

    /// In-memory store, primarily for tests and ephemeral contexts.
    pub fn in_memory() -> Result<Self> {
        Self::spawn_worker(PathBuf::from(":memory:"))
    }

    fn spawn_worker(db_path: PathBuf) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("exploreyou-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open local store database")));
                        return;
                    }
                };

                if path_for_thread.as_os_str() != ":memory:" {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result = init_schema(&conn).context("failed to initialize store schema");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Local store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(LocalStoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    /// Read a JSON value. Expired entries and payloads that fail to decode
    /// are both treated as cache misses; a malformed payload is removed.
    pub async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        let now_ms = Utc::now().timestamp_millis();
        self.execute(move |conn| {
            let row: Option<(String, Option<i64>)> = conn
                .query_row(
                    "SELECT value, expires_at FROM kv_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .with_context(|| "failed to read store entry")?;

            let Some((raw, expires_at)) = row else {
                return Ok(None);
            };

            if let Some(expires_at) = expires_at {
                if expires_at <= now_ms {
                    conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
                    return Ok(None);
                }
            }

            match serde_json::from_str::<T>(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    warn!("Discarding malformed store entry '{key}': {err}");
                    conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
                    Ok(None)
                }
            }
        })
        .await
    }

    /// Write a JSON value, replacing any previous entry. `ttl_ms` of `None`
    /// stores the value without expiry.
    pub async fn put_json<T>(&self, key: &str, value: &T, ttl_ms: Option<i64>) -> Result<()>
    where
        T: Serialize,
    {
        let key = key.to_string();
        let raw = serde_json::to_string(value).context("failed to serialize store entry")?;
        let expires_at = ttl_ms.map(|ttl| Utc::now().timestamp_millis() + ttl);
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
                params![key, raw, expires_at],
            )
            .with_context(|| "failed to write store entry")?;
            Ok(())
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
                .with_context(|| "failed to delete store entry")?;
            Ok(())
        })
        .await
    }
}
