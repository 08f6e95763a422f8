//! Instrument model: contracts, asset-class policy, tick alignment.
//!
//! A [`Contract`] is a fully resolved tradable instrument. The gateway
//! assigns every qualified contract a stable numeric identity; an
//! identity of zero means the descriptor never qualified and must not
//! be used to place orders. Combination (spread) contracts are the one
//! exception: they have no identity of their own and are recognized by
//! [`SecurityKind::Combo`] instead.

mod cache;
mod resolver;

pub use cache::{CONTRACT_TTL, ContractCache};
pub use resolver::{InstrumentResolver, ResolutionError};

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::orders::OrderSide;

/// Closed set of asset classes the terminal trades.
///
/// Per-class trading policy (multiplier treatment, fractional sizing,
/// session eligibility) hangs off this enum rather than being inferred
/// from symbol shape at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityKind {
    /// Common stock or ETF.
    Equity,
    /// Listed option.
    Option,
    /// Futures contract.
    Future,
    /// Cryptocurrency.
    Crypto,
    /// Multi-leg combination (spread) contract.
    Combo,
}

impl SecurityKind {
    /// Whether the contract multiplier is part of the purchase cost.
    ///
    /// Option premiums are quoted per-unit but billed per full contract
    /// value; futures cost margin rather than notional, so their
    /// multiplier stays out of sizing math.
    #[must_use]
    pub const fn multiplier_in_cost(self) -> bool {
        matches!(self, Self::Option)
    }

    /// Whether fractional order quantities are accepted by the gateway.
    #[must_use]
    pub const fn fractional_quantities(self) -> bool {
        matches!(self, Self::Crypto)
    }

    /// Default time-in-force for an order on this asset class.
    ///
    /// Crypto buys only accept short-lived validity; everything else
    /// rests good-till-cancel.
    #[must_use]
    pub const fn default_tif(self, side: OrderSide) -> crate::orders::TimeInForce {
        match (self, side) {
            (Self::Crypto, OrderSide::Buy) => crate::orders::TimeInForce::Minutes,
            _ => crate::orders::TimeInForce::Gtc,
        }
    }
}

/// One weighted leg of a combination contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboLeg {
    /// Numeric identity of the resolved leg instrument.
    pub instrument_id: i64,
    /// Leg size ratio within the combination.
    pub ratio: u32,
    /// Buy or sell this leg when the combination executes.
    pub side: OrderSide,
    /// Execution venue for this leg; legs may route through different
    /// venues than the combination itself.
    pub exchange: String,
}

/// A resolved tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Gateway-assigned numeric identity; zero means unqualified.
    pub instrument_id: i64,
    /// Base display symbol (underlying for options).
    pub symbol: String,
    /// Fully specified venue symbol (OCC-style for options).
    pub local_symbol: String,
    /// Asset class.
    pub kind: SecurityKind,
    /// Contract multiplier (1 when the instrument has none).
    pub multiplier: Decimal,
    /// Quote currency.
    pub currency: String,
    /// Execution exchange. Transient: applies only to the resolution
    /// that produced it and is never persisted to the cache.
    pub exchange: Option<String>,
    /// Minimum price increment.
    pub min_tick: Decimal,
    /// Legs of a combination contract; empty for single instruments.
    #[serde(default)]
    pub legs: Vec<ComboLeg>,
}

impl Contract {
    /// A contract is qualified iff the gateway assigned it an identity.
    #[must_use]
    pub fn is_qualified(&self) -> bool {
        self.instrument_id != 0
    }

    /// Whether this contract may be submitted in an order.
    ///
    /// Combinations carry no identity of their own and are submittable
    /// as long as their legs resolved.
    #[must_use]
    pub fn is_orderable(&self) -> bool {
        self.is_qualified() || (self.kind == SecurityKind::Combo && !self.legs.is_empty())
    }

    /// Quote-subscription display name: local symbol when present.
    #[must_use]
    pub fn display_symbol(&self) -> &str {
        if self.local_symbol.is_empty() {
            &self.symbol
        } else {
            &self.local_symbol
        }
    }

    /// Round a price onto this contract's tick grid.
    #[must_use]
    pub fn align_price(&self, price: Decimal, rounding: TickRounding) -> Decimal {
        align_to_tick(price, self.min_tick, rounding)
    }

    /// Whether an order on this contract may work outside regular
    /// trading hours.
    ///
    /// Options and combinations are restricted to the regular session,
    /// except the index products that trade an extended session.
    #[must_use]
    pub fn outside_rth_eligible(&self) -> bool {
        match self.kind {
            SecurityKind::Option | SecurityKind::Combo => {
                let name = self.display_symbol();
                name.starts_with("SPX") || name.starts_with("VIX")
            }
            SecurityKind::Equity | SecurityKind::Future | SecurityKind::Crypto => true,
        }
    }
}

/// Direction to use when snapping a price onto the tick grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickRounding {
    /// Round to the nearest tick, halves away from zero.
    Nearest,
    /// Round up to the next tick.
    Up,
    /// Round down to the previous tick.
    Down,
}

/// Snap `price` onto a multiple of `tick`.
#[must_use]
pub fn align_to_tick(price: Decimal, tick: Decimal, rounding: TickRounding) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }

    let steps = price / tick;
    let steps = match rounding {
        TickRounding::Nearest => {
            steps.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        }
        TickRounding::Up => steps.ceil(),
        TickRounding::Down => steps.floor(),
    };

    (steps * tick).normalize()
}

/// Raw instrument descriptor prior to qualification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedInstrument {
    /// Known identity hint, zero when the symbol has never resolved.
    pub instrument_id: i64,
    /// Base symbol.
    pub symbol: String,
    /// Venue symbol when already known (cache key component).
    pub local_symbol: String,
    /// Expected asset class.
    pub kind: SecurityKind,
    /// Routing exchange to qualify against.
    pub exchange: String,
    /// Quote currency.
    pub currency: String,
}

impl UnresolvedInstrument {
    /// Descriptor for an equity symbol routed through smart routing.
    #[must_use]
    pub fn equity(symbol: &str) -> Self {
        Self {
            instrument_id: 0,
            symbol: symbol.to_string(),
            local_symbol: String::new(),
            kind: SecurityKind::Equity,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }

    /// Descriptor with an explicit asset class and venue.
    #[must_use]
    pub fn new(symbol: &str, kind: SecurityKind, exchange: &str, currency: &str) -> Self {
        Self {
            instrument_id: 0,
            symbol: symbol.to_string(),
            local_symbol: String::new(),
            kind,
            exchange: exchange.to_string(),
            currency: currency.to_string(),
        }
    }
}

/// Default minimum tick for US equities and options.
pub const DEFAULT_MIN_TICK: Decimal = dec!(0.01);
