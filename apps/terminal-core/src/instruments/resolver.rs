//! Instrument resolution against the gateway.

use crate::gateway::{GatewayError, GatewayPort};

use super::{Contract, ContractCache, UnresolvedInstrument};

/// Per-symbol resolution failure.
///
/// A descriptor that never qualifies (typo'd symbol, unknown venue) is
/// reported to the caller and excluded from downstream use; it is never
/// a fatal error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    /// The gateway returned the descriptor without a usable identity.
    #[error("symbol did not qualify: {0}")]
    Unqualified(String),
}

/// Resolves raw descriptors into qualified contracts, using the durable
/// cache to skip redundant gateway round trips.
pub struct InstrumentResolver {
    cache: ContractCache,
}

impl InstrumentResolver {
    /// Build a resolver over a contract cache.
    #[must_use]
    pub const fn new(cache: ContractCache) -> Self {
        Self { cache }
    }

    /// Access the underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &ContractCache {
        &self.cache
    }

    /// Resolve descriptors, order-preserving.
    ///
    /// Cached (non-expired) entries are served locally; the rest are
    /// batch-qualified in a single gateway call. The result has exactly
    /// one slot per input: `Ok` with the qualified contract or `Err`
    /// for descriptors that never qualified.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] only when the qualify round trip
    /// itself fails; per-symbol failures live in the output slots.
    pub async fn resolve(
        &self,
        gateway: &dyn GatewayPort,
        inputs: &[UnresolvedInstrument],
    ) -> Result<Vec<Result<Contract, ResolutionError>>, GatewayError> {
        let mut resolved: Vec<Option<Contract>> =
            inputs.iter().map(|raw| self.cache.lookup(raw)).collect();

        let pending: Vec<(usize, UnresolvedInstrument)> = resolved
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| (idx, inputs[idx].clone()))
            .collect();

        if !pending.is_empty() {
            let batch: Vec<UnresolvedInstrument> =
                pending.iter().map(|(_, raw)| raw.clone()).collect();
            let qualified = gateway.qualify(&batch).await?;

            for ((idx, _), contract) in pending.into_iter().zip(qualified) {
                if contract.is_qualified() {
                    // The persisted copy drops the transient exchange;
                    // the in-memory contract we hand back keeps it.
                    if let Err(error) = self.cache.put(&contract) {
                        tracing::warn!(
                            symbol = %contract.symbol,
                            %error,
                            "Failed to cache qualified contract"
                        );
                    }
                }
                resolved[idx] = Some(contract);
            }
        }

        Ok(resolved
            .into_iter()
            .zip(inputs)
            .map(|(slot, raw)| {
                // Every slot is filled at this point: cache hits up
                // front, gateway results for the rest.
                match slot {
                    Some(contract) if contract.is_qualified() => Ok(contract),
                    _ => Err(ResolutionError::Unqualified(raw.symbol.clone())),
                }
            })
            .collect())
    }

    /// Resolve a single descriptor.
    ///
    /// # Errors
    ///
    /// [`GatewayError`] for transport failure; the inner result carries
    /// the per-symbol outcome.
    pub async fn resolve_one(
        &self,
        gateway: &dyn GatewayPort,
        raw: &UnresolvedInstrument,
    ) -> Result<Result<Contract, ResolutionError>, GatewayError> {
        let mut out = self.resolve(gateway, std::slice::from_ref(raw)).await?;
        // One input always yields one slot.
        Ok(out.remove(0))
    }
}
