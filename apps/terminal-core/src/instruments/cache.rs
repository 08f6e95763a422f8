//! Durable contract cache.
//!
//! Resolved contracts are static gateway metadata, so they persist
//! across terminal restarts under a long TTL. Each contract is stored
//! under two keys: its numeric identity and its `(local, base)` symbol
//! pair, so lookups work whichever handle the caller has.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{CONTRACTS_NAMESPACE, KvStore, StoreError};

use super::{Contract, UnresolvedInstrument};

/// Contracts expire after 30 days; stale metadata is re-qualified.
pub const CONTRACT_TTL: Duration = Duration::from_secs(86_400 * 30);

/// Key-value backed cache of qualified contracts.
pub struct ContractCache {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl ContractCache {
    /// Wrap a store with the default contract TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_ttl(store, CONTRACT_TTL)
    }

    /// Wrap a store with an explicit TTL.
    #[must_use]
    pub fn with_ttl(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn id_key(instrument_id: i64) -> String {
        format!("id:{instrument_id}")
    }

    fn symbol_key(local_symbol: &str, symbol: &str) -> String {
        format!("sym:{local_symbol}|{symbol}")
    }

    /// Fetch by numeric identity.
    #[must_use]
    pub fn get_by_id(&self, instrument_id: i64) -> Option<Contract> {
        if instrument_id == 0 {
            return None;
        }
        self.fetch(&Self::id_key(instrument_id))
    }

    /// Fetch by `(local, base)` symbol pair.
    #[must_use]
    pub fn get_by_symbol(&self, local_symbol: &str, symbol: &str) -> Option<Contract> {
        self.fetch(&Self::symbol_key(local_symbol, symbol))
    }

    /// Look up whichever handle the raw descriptor carries.
    #[must_use]
    pub fn lookup(&self, raw: &UnresolvedInstrument) -> Option<Contract> {
        if raw.instrument_id != 0 {
            if let Some(found) = self.get_by_id(raw.instrument_id) {
                return Some(found);
            }
        }

        if let Some(found) = self.get_by_symbol(&raw.local_symbol, &raw.symbol) {
            return Some(found);
        }

        // Symbol-only descriptors (no venue symbol yet) still hit the
        // cache when the venue symbol equals the base symbol, which
        // covers equities.
        if raw.local_symbol.is_empty() {
            return self.get_by_symbol(&raw.symbol, &raw.symbol);
        }

        None
    }

    /// Cache a qualified contract under both key forms.
    ///
    /// The execution exchange only applies to the resolution that
    /// produced it, so the persisted copy has it blanked. The caller's
    /// contract is untouched.
    pub fn put(&self, contract: &Contract) -> Result<(), StoreError> {
        if !contract.is_qualified() {
            return Ok(());
        }

        let mut persisted = contract.clone();
        persisted.exchange = None;

        let payload = serde_json::to_vec(&persisted)?;

        self.store.set(
            CONTRACTS_NAMESPACE,
            &Self::id_key(persisted.instrument_id),
            &payload,
            Some(self.ttl),
        )?;
        self.store.set(
            CONTRACTS_NAMESPACE,
            &Self::symbol_key(&persisted.local_symbol, &persisted.symbol),
            &payload,
            Some(self.ttl),
        )?;

        Ok(())
    }

    fn fetch(&self, key: &str) -> Option<Contract> {
        match self.store.get(CONTRACTS_NAMESPACE, key) {
            Ok(Some(payload)) => match serde_json::from_slice(&payload) {
                Ok(contract) => Some(contract),
                Err(error) => {
                    tracing::warn!(key, %error, "Discarding undecodable cached contract");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                // A cache read failure is never fatal; the resolver
                // falls through to a gateway round trip.
                tracing::warn!(key, %error, "Contract cache read failed");
                None
            }
        }
    }
}
