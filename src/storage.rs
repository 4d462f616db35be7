use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// String key-value storage the engine persists client state through.
///
/// Keys are namespaced by convention, e.g. `receipts:<viewer>` or `board:<viewer>:<community>`.
pub trait StoragePort {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Removes every key starting with `prefix`, returning how many were dropped.
    fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

pub fn read_json<T: DeserializeOwned>(store: &dyn StoragePort, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Stored value under {key} is not valid"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub fn write_json<T: Serialize>(store: &dyn StoragePort, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Durable storage: survives restarts, shared by every session on this machine.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Could not create {}", dir.display()))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS client_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl StoragePort for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("Failed to lock database connection"))?;
        let value = conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("Failed to lock database connection"))?;
        conn.execute(
            "INSERT OR REPLACE INTO client_state (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("Failed to lock database connection"))?;
        conn.execute("DELETE FROM client_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| anyhow!("Failed to lock database connection"))?;
        // substr instead of LIKE so ids containing % or _ match literally
        let removed = conn.execute(
            "DELETE FROM client_state WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
        )?;
        Ok(removed)
    }
}

/// Session storage: lives exactly as long as the running client.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoragePort for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| anyhow!("Failed to lock session storage"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("Failed to lock session storage"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("Failed to lock session storage"))?;
        entries.remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.write().map_err(|_| anyhow!("Failed to lock session storage"))?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}
