//! Live quote state.
//!
//! One [`QuoteRegistry`] tracks every live market-data subscription for
//! the session, keyed by a normalized symbol key. Subscribing is
//! idempotent: asking twice for the same contract returns the existing
//! key without opening a second gateway stream. Gateway push events
//! land in [`QuoteRegistry::apply_tick`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::gateway::{GatewayError, GatewayPort};
use crate::instruments::{Contract, SecurityKind};
use crate::orders::OrderSide;

/// Subscription key for a contract.
///
/// Venue symbols keep their space padding on the wire (OCC option
/// symbols), so keys strip spaces for stable reference. Combination
/// contracts have no venue symbol of their own and get a synthetic key
/// built from their legs.
#[must_use]
pub fn lookup_key(contract: &Contract) -> String {
    if contract.kind == SecurityKind::Combo {
        let legs: Vec<String> = contract
            .legs
            .iter()
            .map(|leg| {
                let sign = match leg.side {
                    OrderSide::Buy => "",
                    OrderSide::Sell => "-",
                };
                format!("{sign}{}x{}", leg.ratio, leg.instrument_id)
            })
            .collect();
        return format!("legs:{}", legs.join(","));
    }

    contract.display_symbol().replace(' ', "")
}

/// One live quote update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteTick {
    /// Best bid, zero when absent.
    pub bid: Decimal,
    /// Best ask, zero when absent.
    pub ask: Decimal,
    /// Size at the bid.
    pub bid_size: Decimal,
    /// Size at the ask.
    pub ask_size: Decimal,
    /// Last trade price.
    pub last: Decimal,
    /// Tick timestamp.
    pub at: Option<DateTime<Utc>>,
}

impl QuoteTick {
    /// A quote is usable once at least one side has a positive price.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.bid > Decimal::ZERO || self.ask > Decimal::ZERO
    }
}

struct QuoteSlot {
    contract: Contract,
    tick: QuoteTick,
}

/// Registry of live quote subscriptions.
#[derive(Default)]
pub struct QuoteRegistry {
    slots: RwLock<HashMap<String, QuoteSlot>>,
}

impl QuoteRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to quotes for a resolved contract.
    ///
    /// Returns the subscription key. Re-subscribing an already tracked
    /// key is a no-op that skips the gateway entirely.
    pub async fn subscribe(
        &self,
        gateway: &dyn GatewayPort,
        contract: &Contract,
    ) -> Result<String, GatewayError> {
        let key = lookup_key(contract);

        if self.slots.read().contains_key(&key) {
            return Ok(key);
        }

        gateway.subscribe_quote(contract).await?;

        self.slots.write().insert(
            key.clone(),
            QuoteSlot {
                contract: contract.clone(),
                tick: QuoteTick::default(),
            },
        );

        tracing::debug!(key = %key, "Quote subscription added");
        Ok(key)
    }

    /// Current `(bid, ask)` for a key, only while the quote is usable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<(Decimal, Decimal)> {
        let slots = self.slots.read();
        let slot = slots.get(key)?;
        if slot.tick.is_usable() {
            Some((slot.tick.bid, slot.tick.ask))
        } else {
            None
        }
    }

    /// Full tick snapshot for a key, usable or not.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<QuoteTick> {
        self.slots.read().get(key).map(|slot| slot.tick.clone())
    }

    /// Whether a key has an active subscription.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Apply a gateway push update to a tracked key.
    pub fn apply_tick(&self, key: &str, tick: QuoteTick) {
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get_mut(key) {
            slot.tick = tick;
        } else {
            tracing::trace!(key, "Dropping tick for unsubscribed key");
        }
    }

    /// All active subscription keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Contracts behind the active subscriptions (for resubscribe).
    #[must_use]
    pub fn contracts(&self) -> Vec<Contract> {
        self.slots
            .read()
            .values()
            .map(|slot| slot.contract.clone())
            .collect()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no subscriptions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Drop all subscriptions (reconnect rebuild path).
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}
