//! Brokerage gateway port.
//!
//! The terminal never speaks the broker wire protocol itself; it
//! consumes an opaque async client through [`GatewayPort`]. Request
//! operations are plain async calls; push-style updates (account
//! summary, PnL, order status, fills, news, disconnects) arrive on a
//! broadcast event stream consumed by the session on its single
//! scheduling context.

pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::instruments::{Contract, UnresolvedInstrument};
use crate::orders::{OrderSide, OrderTicket, TradeState};
use crate::quotes::QuoteTick;

/// Errors surfaced by gateway operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Nothing listening at the configured endpoint.
    #[error("connection refused")]
    ConnectionRefused,

    /// The session dropped mid-operation.
    #[error("connection reset")]
    ConnectionReset,

    /// The operation did not complete in time.
    #[error("timed out")]
    Timeout,

    /// The operation was cancelled locally.
    #[error("cancelled")]
    Cancelled,

    /// No active session.
    #[error("not connected")]
    NotConnected,

    /// Any other gateway failure.
    #[error("gateway error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Whether a connect-time failure should be retried quietly.
    ///
    /// Refused/reset/timeout/cancelled are the expected failure modes
    /// while a gateway restarts; anything else is logged in full before
    /// the retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused | Self::ConnectionReset | Self::Timeout | Self::Cancelled
        )
    }
}

/// One portfolio row pushed by the gateway.
#[derive(Debug, Clone)]
pub struct PositionRow {
    /// Resolved contract held.
    pub contract: Contract,
    /// Signed position size (negative = short).
    pub quantity: Decimal,
    /// Gateway's best-effort mark price.
    pub market_price: Decimal,
    /// Average acquisition cost.
    pub average_cost: Decimal,
}

/// Margin/commission estimate from a what-if order preview.
#[derive(Debug, Clone, Default)]
pub struct MarginEstimate {
    /// Change in initial margin if the order executed.
    pub init_margin_change: Decimal,
    /// Change in maintenance margin if the order executed.
    pub maint_margin_change: Decimal,
    /// Initial margin requirement after the order.
    pub init_margin_after: Decimal,
    /// Equity with loan value after the order.
    pub equity_with_loan_after: Decimal,
    /// Change in equity with loan value.
    pub equity_with_loan_change: Decimal,
    /// Fixed commission when the venue quotes one.
    pub commission: Option<Decimal>,
    /// Commission range lower bound.
    pub min_commission: Option<Decimal>,
    /// Commission range upper bound.
    pub max_commission: Option<Decimal>,
    /// Non-empty when the estimate is not actionable.
    pub warning: String,
}

/// Push events emitted by the gateway session.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The session dropped; the supervisor reconnects.
    Disconnected,
    /// One account summary row (tag/value) for an account.
    AccountSummary {
        /// Account the row applies to ("All" for the aggregate).
        account: String,
        /// Summary tag, e.g. `NetLiquidation`.
        tag: String,
        /// Raw value string.
        value: String,
    },
    /// Aggregate account PnL update.
    Pnl {
        /// PnL accrued today.
        daily: Decimal,
        /// Open-position PnL.
        unrealized: Decimal,
        /// Closed-position PnL.
        realized: Decimal,
    },
    /// Per-position PnL update.
    PositionPnl {
        /// Instrument the update applies to.
        instrument_id: i64,
        /// PnL accrued today for this position.
        daily: Decimal,
        /// Open PnL for this position.
        unrealized: Decimal,
    },
    /// Portfolio row update.
    Portfolio(PositionRow),
    /// Broker-side order status change.
    OrderStatus(TradeState),
    /// An execution (fill) report.
    Execution {
        /// Order that filled.
        order_id: i64,
        /// Instrument that filled.
        instrument_id: i64,
        /// Venue symbol of the filled instrument.
        local_symbol: String,
        /// Fill direction.
        side: OrderSide,
        /// Units in this fill.
        shares: Decimal,
        /// Execution price.
        price: Decimal,
        /// Cumulative filled quantity for the position.
        cumulative_quantity: Decimal,
    },
    /// Commission report for a fill.
    Commission {
        /// Order the commission applies to.
        order_id: i64,
        /// Venue symbol.
        local_symbol: String,
        /// Commission charged.
        commission: Decimal,
        /// Realized PnL if the fill closed quantity.
        realized_pnl: Option<Decimal>,
    },
    /// An order was cancelled.
    OrderCancelled {
        /// Cancelled order id.
        order_id: i64,
        /// Gateway-provided reason.
        reason: String,
    },
    /// Gateway API error or status notice.
    ApiError {
        /// Related order id, zero when not order-scoped.
        order_id: i64,
        /// Gateway status code.
        code: i32,
        /// Message text.
        message: String,
    },
    /// News bulletin text.
    NewsBulletin {
        /// Bulletin body.
        message: String,
    },
    /// Live quote tick for a subscribed key.
    Quote {
        /// Subscription key the tick belongs to.
        key: String,
        /// The tick payload.
        tick: QuoteTick,
    },
}

/// Async brokerage gateway client.
///
/// Adapters tag each [`GatewayEvent::Quote`] with the subscription key
/// derived from the subscribed contract (see
/// [`crate::quotes::lookup_key`]).
#[async_trait]
pub trait GatewayPort: Send + Sync {
    /// Open the session.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        client_id: i32,
        account: &str,
    ) -> Result<(), GatewayError>;

    /// Qualify raw descriptors into resolved contracts.
    ///
    /// Returns one contract per input, in input order; descriptors that
    /// did not qualify come back with a zero identity.
    async fn qualify(
        &self,
        instruments: &[UnresolvedInstrument],
    ) -> Result<Vec<Contract>, GatewayError>;

    /// Start streaming quotes for a contract.
    async fn subscribe_quote(&self, contract: &Contract) -> Result<(), GatewayError>;

    /// Submit an order.
    async fn place_order(
        &self,
        contract: &Contract,
        ticket: &OrderTicket,
    ) -> Result<TradeState, GatewayError>;

    /// What-if an order without submitting it.
    async fn preview_order(
        &self,
        contract: &Contract,
        ticket: &OrderTicket,
    ) -> Result<MarginEstimate, GatewayError>;

    /// Cancel a working order.
    async fn cancel_order(&self, order_id: i64) -> Result<(), GatewayError>;

    /// Re-issue account summary, aggregate PnL, and news subscriptions.
    async fn request_account_subscriptions(&self, account: &str) -> Result<(), GatewayError>;

    /// Start a per-position PnL subscription.
    async fn subscribe_position_pnl(
        &self,
        account: &str,
        instrument_id: i64,
    ) -> Result<(), GatewayError>;

    /// Stop a per-position PnL subscription.
    async fn cancel_position_pnl(&self, instrument_id: i64) -> Result<(), GatewayError>;

    /// Allocate the next client-side order id.
    fn next_order_id(&self) -> i64;

    /// Subscribe to the push event stream.
    fn events(&self) -> broadcast::Receiver<GatewayEvent>;
}
