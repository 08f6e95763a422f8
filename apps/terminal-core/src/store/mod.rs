//! Durable key-value storage.
//!
//! The terminal persists resolved instrument descriptors (and a small
//! amount of derived data such as strike lists) across restarts. The
//! backing store is deliberately dumb: namespaced get/set/expire with
//! per-key TTLs and no transactional requirements beyond per-key
//! atomicity. Components receive the store through the [`KvStore`]
//! trait so tests can swap in an in-memory database.

mod sqlite;

pub use sqlite::SqliteKvStore;

use std::time::Duration;

use thiserror::Error;

/// Namespace for resolved contract descriptors.
pub const CONTRACTS_NAMESPACE: &str = "contracts";

/// Namespace for miscellaneous derived data (strike lists, etc).
pub const DERIVED_NAMESPACE: &str = "derived";

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("store error: {0}")]
    Database(String),

    /// Value failed to serialize or deserialize.
    #[error("store codec error: {0}")]
    Codec(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Namespaced key-value store with per-key expiry.
///
/// Expired entries behave exactly like missing entries: `get` never
/// returns a value past its TTL.
pub trait KvStore: Send + Sync {
    /// Fetch a value, treating expired entries as absent.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store a value, optionally expiring after `ttl`.
    fn set(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Drop a key immediately.
    fn expire(&self, namespace: &str, key: &str) -> Result<(), StoreError>;
}
