//! Order model: tickets, trade state, amount accounting.

mod bracket;
mod spread;

pub use bracket::{BracketBuilder, BracketConfig, BracketError, BracketOrders};
pub use spread::{AssemblyError, LegRequest, SpreadAssembler};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instruments::{Contract, SecurityKind};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy / long entry.
    Buy,
    /// Sell / short entry or close.
    Sell,
}

impl OrderSide {
    /// The closing direction for this side.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Wire spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order types the terminal submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Resting limit order.
    Limit,
    /// Market order.
    Market,
    /// Trailing stop that converts to a limit when triggered.
    TrailLimit,
    /// Stop with market protection.
    StopProtect,
}

/// Order validity duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good until explicitly cancelled.
    Gtc,
    /// Valid for the trading day.
    Day,
    /// Immediate or cancel.
    Ioc,
    /// Valid for a few minutes (crypto buys).
    Minutes,
}

/// Broker-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatusKind {
    /// Sent, not yet acknowledged.
    PendingSubmit,
    /// Working at the venue.
    Submitted,
    /// Completely filled.
    Filled,
    /// Cancelled before completion.
    Cancelled,
    /// Rejected by the broker or venue.
    Rejected,
}

impl OrderStatusKind {
    /// Whether no further updates can arrive.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// A fully specified order ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    /// Client-assigned order id.
    pub order_id: i64,
    /// Direction.
    pub side: OrderSide,
    /// Units to trade.
    pub quantity: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price for limit-style types.
    pub limit_price: Option<Decimal>,
    /// Auxiliary price: trail distance or stop trigger.
    pub aux_price: Option<Decimal>,
    /// Initial trigger level for trailing orders.
    pub trail_stop_price: Option<Decimal>,
    /// Offset applied to the limit when a trailing stop triggers.
    pub limit_price_offset: Option<Decimal>,
    /// Parent order this one depends on.
    pub parent_id: Option<i64>,
    /// Whether the gateway should transmit immediately. Dependent
    /// bracket legs are staged with the parent non-transmitting so the
    /// group activates atomically.
    pub transmit: bool,
    /// Whether the order may work outside regular hours.
    pub outside_rth: bool,
    /// Validity duration.
    pub tif: TimeInForce,
}

impl OrderTicket {
    /// A plain transmitting limit order.
    #[must_use]
    pub fn limit(order_id: i64, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            order_id,
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(price),
            aux_price: None,
            trail_stop_price: None,
            limit_price_offset: None,
            parent_id: None,
            transmit: true,
            outside_rth: true,
            tif: TimeInForce::Gtc,
        }
    }
}

/// A submitted order plus its live broker-side status.
#[derive(Debug, Clone)]
pub struct TradeState {
    /// Order id.
    pub order_id: i64,
    /// Contract the order trades.
    pub contract: Contract,
    /// The submitted ticket.
    pub ticket: OrderTicket,
    /// Current status.
    pub status: OrderStatusKind,
    /// Quantity filled so far.
    pub filled: Decimal,
    /// Quantity still working.
    pub remaining: Decimal,
    /// Average fill price over the filled quantity.
    pub avg_fill_price: Decimal,
}

/// Dollar-amount accounting for a working trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeAmounts {
    /// Amount still to be spent at the current limit price.
    pub remaining_amount: Decimal,
    /// Total spend across filled and working quantity.
    pub total_amount: Decimal,
    /// Current limit price.
    pub limit_price: Decimal,
    /// Quantity still working.
    pub remaining_quantity: Decimal,
}

/// Compute the dollar amounts a working trade represents.
///
/// Uses the average fill price once fills exist, the limit price
/// otherwise. Futures are exempt from the multiplier here: their cost
/// is margin, not notional.
#[must_use]
pub fn amount_for_trade(trade: &TradeState) -> TradeAmounts {
    let limit_price = trade.ticket.limit_price.unwrap_or_default();
    let total_quantity = trade.remaining + trade.filled;

    let multiplier = if trade.contract.kind == SecurityKind::Future {
        Decimal::ONE
    } else {
        trade.contract.multiplier
    };

    let effective = if trade.avg_fill_price > Decimal::ZERO {
        trade.avg_fill_price
    } else {
        limit_price
    };

    TradeAmounts {
        remaining_amount: trade.remaining * limit_price * multiplier,
        total_amount: total_quantity * effective * multiplier,
        limit_price,
        remaining_quantity: trade.remaining,
    }
}
