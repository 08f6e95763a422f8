//! SQLite-backed implementation of the durable store.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use super::{KvStore, StoreError};

/// Embedded SQLite store.
///
/// A single connection behind a mutex is plenty here: every access is a
/// point read or write issued from the terminal's one scheduling
/// context.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a private in-memory store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS kv (
                namespace  TEXT NOT NULL,
                key        TEXT NOT NULL,
                payload    BLOB NOT NULL,
                expires_at INTEGER,
                PRIMARY KEY (namespace, key)
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn now_epoch() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a writer panicked mid-statement; the
        // connection itself is still usable for key-value access.
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock();

        let row: Option<(Vec<u8>, Option<i64>)> = conn
            .query_row(
                "SELECT payload, expires_at FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, Some(expires_at))) if expires_at <= Self::now_epoch() => {
                // Lazily reap the stale row so the table does not grow
                // without bound between restarts.
                conn.execute(
                    "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                Ok(None)
            }
            Some((payload, _)) => Ok(Some(payload)),
            None => Ok(None),
        }
    }

    fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Self::now_epoch() + ttl.as_secs() as i64);

        self.lock().execute(
            "INSERT OR REPLACE INTO kv (namespace, key, payload, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![namespace, key, value, expires_at],
        )?;

        Ok(())
    }

    fn expire(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.lock().execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let store = SqliteKvStore::in_memory().unwrap();

        store.set("contracts", "id:1", b"payload", None).unwrap();
        assert_eq!(
            store.get("contracts", "id:1").unwrap(),
            Some(b"payload".to_vec())
        );

        // Namespaces do not bleed into each other.
        assert_eq!(store.get("derived", "id:1").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let store = SqliteKvStore::in_memory().unwrap();

        store.set("derived", "k", b"one", None).unwrap();
        store.set("derived", "k", b"two", None).unwrap();
        assert_eq!(store.get("derived", "k").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let store = SqliteKvStore::in_memory().unwrap();

        store
            .set("contracts", "id:2", b"stale", Some(Duration::ZERO))
            .unwrap();
        assert_eq!(store.get("contracts", "id:2").unwrap(), None);
        // The reaped row stays gone.
        assert_eq!(store.get("contracts", "id:2").unwrap(), None);
    }

    #[test]
    fn explicit_expire_drops_key() {
        let store = SqliteKvStore::in_memory().unwrap();

        store.set("contracts", "id:3", b"live", None).unwrap();
        store.expire("contracts", "id:3").unwrap();
        assert_eq!(store.get("contracts", "id:3").unwrap(), None);
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.set("contracts", "id:4", b"durable", None).unwrap();
        }

        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(
            store.get("contracts", "id:4").unwrap(),
            Some(b"durable".to_vec())
        );
    }
}
