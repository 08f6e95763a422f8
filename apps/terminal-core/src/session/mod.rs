//! Process-wide session state.
//!
//! One [`Session`] owns everything the terminal knows about the live
//! gateway connection: connection state, the account ledger, open
//! positions and orders, the instrument resolver/cache, and the quote
//! registry. Components receive the session by reference; there are no
//! module-level singletons.

mod events;
mod supervisor;

pub use supervisor::{ConnectionSupervisor, SupervisorConfig};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::gateway::{GatewayError, GatewayPort, MarginEstimate, PositionRow};
use crate::instruments::{Contract, InstrumentResolver, UnresolvedInstrument};
use crate::orders::{OrderSide, OrderTicket, OrderType, TradeState};
use crate::quotes::{QuoteRegistry, lookup_key};
use crate::sizing::{OrderSizer, SizingError};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No gateway session.
    Disconnected,
    /// Connect attempt in progress.
    Connecting,
    /// Live session.
    Connected,
}

/// Derived account status tracked from gateway summary and PnL pushes.
///
/// Raw summary rows are kept verbatim; numeric fields feed a derived
/// status map with buying-power tiers and PnL percentages.
#[derive(Debug, Default)]
pub struct AccountLedger {
    summary: HashMap<String, String>,
    status: HashMap<String, Decimal>,
}

impl AccountLedger {
    /// Apply one account-summary row.
    pub fn apply_summary(&mut self, tag: &str, value: &str) {
        self.summary.insert(tag.to_string(), value.to_string());

        let Ok(parsed) = value.parse::<Decimal>() else {
            return;
        };

        match tag {
            "BuyingPower" => {
                // 25% margin for boring symbols.
                self.status.insert("BuyingPower4".to_string(), parsed);
                // 30% margin tier.
                self.status.insert(
                    "BuyingPower3".to_string(),
                    parsed * Decimal::new(75, 2),
                );
                // 50% margin for overnight holds.
                self.status
                    .insert("BuyingPower2".to_string(), parsed / Decimal::TWO);
            }
            "NetLiquidation" => {
                self.status.insert(tag.to_string(), parsed);

                let upl = self.get("UnrealizedPnL").unwrap_or_default();
                let rpl = self.get("RealizedPnL").unwrap_or_default();
                // The PnL contribution is already inside net
                // liquidation, so back it out of the denominator.
                if parsed != rpl {
                    self.status.insert(
                        "RealizedPnL%".to_string(),
                        rpl / (parsed - rpl) * Decimal::ONE_HUNDRED,
                    );
                }
                if parsed != upl {
                    self.status.insert(
                        "UnrealizedPnL%".to_string(),
                        upl / (parsed - upl) * Decimal::ONE_HUNDRED,
                    );
                }
            }
            _ => {
                self.status.insert(tag.to_string(), parsed);
            }
        }
    }

    /// Apply an aggregate PnL update.
    pub fn apply_pnl(&mut self, daily: Decimal, unrealized: Decimal, realized: Decimal) {
        self.status.insert("DailyPnL".to_string(), daily);
        self.status.insert("UnrealizedPnL".to_string(), unrealized);
        self.status.insert("RealizedPnL".to_string(), realized);
    }

    /// A derived status value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Decimal> {
        self.status.get(key).copied()
    }

    /// A raw summary row.
    #[must_use]
    pub fn summary(&self, tag: &str) -> Option<&str> {
        self.summary.get(tag).map(String::as_str)
    }

    /// Drop everything (reconnect path).
    pub fn clear(&mut self) {
        self.summary.clear();
        self.status.clear();
    }
}

/// Process-wide connection and account state.
pub struct Session {
    gateway: Arc<dyn GatewayPort>,
    account_id: String,
    state: Mutex<SessionState>,
    sandbox: Mutex<Option<bool>>,
    exit: CancellationToken,
    /// Instrument resolution and durable caching.
    pub resolver: InstrumentResolver,
    /// Live quote subscriptions.
    pub quotes: QuoteRegistry,
    /// Order quantity/price derivation.
    pub sizer: OrderSizer,
    ledger: RwLock<AccountLedger>,
    positions: RwLock<HashMap<String, PositionRow>>,
    orders: RwLock<HashMap<i64, TradeState>>,
    position_pnl: Mutex<HashSet<i64>>,
    position_pnl_values: RwLock<HashMap<i64, (Decimal, Decimal)>>,
}

impl Session {
    /// Assemble a session around a gateway client.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn GatewayPort>,
        resolver: InstrumentResolver,
        sizer: OrderSizer,
        account_id: String,
        exit: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            account_id,
            state: Mutex::new(SessionState::Disconnected),
            sandbox: Mutex::new(None),
            exit,
            resolver,
            quotes: QuoteRegistry::new(),
            sizer,
            ledger: RwLock::new(AccountLedger::default()),
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            position_pnl: Mutex::new(HashSet::new()),
            position_pnl_values: RwLock::new(HashMap::new()),
        }
    }

    /// The gateway client.
    #[must_use]
    pub fn gateway(&self) -> &dyn GatewayPort {
        self.gateway.as_ref()
    }

    /// Active account id.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Whether the session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Token observed by every long wait; cancelling it ends the
    /// process once in-flight operations unwind.
    #[must_use]
    pub fn exit_token(&self) -> &CancellationToken {
        &self.exit
    }

    /// Whether an exit has been requested.
    #[must_use]
    pub fn exit_requested(&self) -> bool {
        self.exit.is_cancelled()
    }

    /// Request process exit.
    pub fn request_exit(&self) {
        self.exit.cancel();
    }

    /// Latch the sandbox flag from an account-scoped event.
    ///
    /// Decided once, from the first event whose account is not the
    /// synthetic "All" aggregate. Sandbox account ids start with "D".
    pub(crate) fn note_account(&self, account: &str) {
        if account == "All" {
            return;
        }
        let mut sandbox = self.sandbox.lock();
        if sandbox.is_none() {
            let is_sandbox = account.starts_with('D');
            tracing::info!(account, is_sandbox, "Account tier decided");
            *sandbox = Some(is_sandbox);
        }
    }

    /// Whether the account is a sandbox/paper account, once known.
    #[must_use]
    pub fn is_sandbox(&self) -> Option<bool> {
        *self.sandbox.lock()
    }

    /// Human name for the account tier.
    #[must_use]
    pub fn level_name(&self) -> &'static str {
        match self.is_sandbox() {
            None => "undecided",
            Some(true) => "paper",
            Some(false) => "live",
        }
    }

    /// Read access to the account ledger.
    pub fn with_ledger<T>(&self, f: impl FnOnce(&AccountLedger) -> T) -> T {
        f(&self.ledger.read())
    }

    /// Tracked open orders.
    #[must_use]
    pub fn open_orders(&self) -> Vec<TradeState> {
        self.orders.read().values().cloned().collect()
    }

    /// All tracked positions.
    #[must_use]
    pub fn positions(&self) -> Vec<PositionRow> {
        self.positions.read().values().cloned().collect()
    }

    /// Latest `(daily, unrealized)` PnL for a position, if streaming.
    #[must_use]
    pub fn position_pnl(&self, instrument_id: i64) -> Option<(Decimal, Decimal)> {
        self.position_pnl_values.read().get(&instrument_id).copied()
    }

    /// Match positions by a glob over the space-stripped venue symbol.
    ///
    /// `?` matches one character, `*` any run. When `quantity` is given
    /// it is capped to the position size and carries the position's
    /// sign; otherwise the full position size is returned.
    #[must_use]
    pub fn positions_matching(
        &self,
        pattern: &str,
        quantity: Option<Decimal>,
    ) -> Vec<(Contract, Decimal, Decimal)> {
        let Some(matcher) = glob_to_regex(&pattern.replace('/', "")) else {
            tracing::error!(pattern, "Unusable position pattern");
            return Vec::new();
        };

        self.positions
            .read()
            .values()
            .filter(|row| {
                let name = row.contract.local_symbol.replace(' ', "");
                matcher.is_match(&name)
            })
            .map(|row| {
                let size = row.quantity;
                let found = match quantity {
                    None => size,
                    Some(wanted) if wanted.abs() >= size.abs() => size,
                    Some(wanted) => {
                        // Requested amount, signed like the position.
                        if size.is_sign_negative() {
                            -wanted.abs()
                        } else {
                            wanted.abs()
                        }
                    }
                };
                (row.contract.clone(), found, row.market_price)
            })
            .collect()
    }

    /// Reset per-connection caches so a reconnect never shows stale
    /// account, position, order, or PnL state.
    pub(crate) fn clear_transient(&self) {
        self.ledger.write().clear();
        self.positions.write().clear();
        self.orders.write().clear();
        self.position_pnl.lock().clear();
        self.position_pnl_values.write().clear();
    }

    /// Resolve a symbol and subscribe its quote (the `add` operation).
    pub async fn add_quote(&self, symbol: &str) -> Result<String, AddQuoteError> {
        let raw = UnresolvedInstrument::equity(&symbol.to_uppercase());
        let contract = self
            .resolver
            .resolve_one(self.gateway(), &raw)
            .await?
            .map_err(|error| {
                tracing::error!(symbol, %error, "Failed to find live contract");
                AddQuoteError::Resolution(error)
            })?;

        Ok(self.quotes.subscribe(self.gateway(), &contract).await?)
    }

    /// Place (or preview) an order for a resolved contract.
    ///
    /// `quantity` follows the request convention: positive units or a
    /// negative dollar budget. Returns the trade the gateway created,
    /// or `None` for previews.
    pub async fn place_order_for_contract(
        &self,
        contract: &Contract,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        preview: bool,
    ) -> Result<Option<TradeState>, PlaceOrderError> {
        let symbol = contract.display_symbol().replace(' ', "");

        if !contract.is_orderable() {
            tracing::error!(symbol = %symbol, "Not submitting order: contract not qualified");
            return Err(PlaceOrderError::Unqualified(symbol));
        }

        if price > Decimal::ZERO {
            tracing::info!(symbol = %symbol, %quantity, %price, "Order request");
        } else {
            tracing::info!(symbol = %symbol, %quantity, "Order request at dynamic price");
        }

        let sized = self
            .sizer
            .derive(
                self.gateway(),
                &self.quotes,
                contract,
                side,
                quantity,
                price,
                &self.exit,
            )
            .await?;

        let order_type = if sized.limit_price > Decimal::ZERO {
            OrderType::Limit
        } else {
            OrderType::Market
        };

        let ticket = OrderTicket {
            order_id: self.gateway.next_order_id(),
            side,
            quantity: sized.quantity,
            order_type,
            limit_price: (sized.limit_price > Decimal::ZERO).then_some(sized.limit_price),
            aux_price: None,
            trail_stop_price: None,
            limit_price_offset: None,
            parent_id: None,
            transmit: true,
            outside_rth: contract.outside_rth_eligible(),
            tif: contract.kind.default_tif(side),
        };

        tracing::info!(
            symbol = %symbol,
            side = %side,
            quantity = %ticket.quantity,
            price = %sized.limit_price,
            notional = %(ticket.quantity * sized.limit_price * contract.multiplier),
            outside_rth = ticket.outside_rth,
            tif = ?ticket.tif,
            "Submitting order"
        );

        if preview {
            let estimate = self.gateway.preview_order(contract, &ticket).await?;
            log_preview(&symbol, contract, &ticket, &estimate);
            return Ok(None);
        }

        let trade = self.gateway.place_order(contract, &ticket).await?;
        tracing::info!(
            order_id = trade.order_id,
            status = ?trade.status,
            symbol = %symbol,
            "Order placed"
        );

        self.orders.write().insert(trade.order_id, trade.clone());
        Ok(Some(trade))
    }

    fn track_order(&self, trade: TradeState) {
        self.orders.write().insert(trade.order_id, trade);
    }

    fn record_position_pnl(&self, instrument_id: i64, daily: Decimal, unrealized: Decimal) {
        self.position_pnl_values
            .write()
            .insert(instrument_id, (daily, unrealized));
    }

    fn upsert_position(&self, row: PositionRow) {
        let key = lookup_key(&row.contract);
        self.positions.write().insert(key, row);
    }
}

/// Failure adding a quote subscription.
#[derive(Debug, thiserror::Error)]
pub enum AddQuoteError {
    /// The symbol never resolved.
    #[error(transparent)]
    Resolution(#[from] crate::instruments::ResolutionError),

    /// Gateway transport failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Failure placing one order; aborts only that order.
#[derive(Debug, thiserror::Error)]
pub enum PlaceOrderError {
    /// Refusing to submit an unqualified contract.
    #[error("contract not qualified: {0}")]
    Unqualified(String),

    /// Sizing failed (no quote, dust budget).
    #[error(transparent)]
    Sizing(#[from] SizingError),

    /// Gateway transport failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Log a what-if estimate the way the order path would have submitted.
fn log_preview(symbol: &str, contract: &Contract, ticket: &OrderTicket, est: &MarginEstimate) {
    let desc = format!("{symbol} :: QTY {}", ticket.quantity);

    if !est.warning.is_empty() {
        tracing::warn!(desc = %desc, warning = %est.warning, "Preview carries a warning");
        return;
    }

    let limit = ticket.limit_price.unwrap_or_default();
    let notional = ticket.quantity * limit * contract.multiplier;

    if est.init_margin_change > Decimal::ZERO && notional > Decimal::ZERO {
        let init_pct = est.init_margin_change / notional * Decimal::ONE_HUNDRED;
        let maint_pct = est.maint_margin_change / notional * Decimal::ONE_HUNDRED;
        tracing::info!(
            desc = %desc,
            init_margin = %est.init_margin_change,
            init_pct = %init_pct.round_dp(2),
            maint_pct = %maint_pct.round_dp(2),
            per_unit = %(est.init_margin_change / ticket.quantity).round_dp(2),
            "Preview margin requirement"
        );
    }

    if let (Some(min), Some(max)) = (est.min_commission, est.max_commission) {
        tracing::info!(
            desc = %desc,
            min = %(min / ticket.quantity).round_dp(4),
            max = %(max / ticket.quantity).round_dp(4),
            "Preview commission range per unit"
        );
    } else if let Some(commission) = est.commission {
        tracing::info!(
            desc = %desc,
            commission = %(commission / ticket.quantity).round_dp(4),
            "Preview fixed commission per unit"
        );
    }

    let excess = est.equity_with_loan_after - est.init_margin_after;
    if excess < Decimal::ZERO {
        tracing::warn!(desc = %desc, missing = %excess.abs(), "Trade not viable: missing equity");
    }
}

/// Translate a `?`/`*` glob into an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => translated.push_str(".*"),
            '?' => translated.push('.'),
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use crate::instruments::{ContractCache, DEFAULT_MIN_TICK, SecurityKind};
    use crate::orders::{OrderStatusKind, TimeInForce};
    use crate::store::SqliteKvStore;
    use rust_decimal_macros::dec;

    fn session_with(gateway: Arc<MockGateway>) -> Session {
        let resolver = InstrumentResolver::new(ContractCache::new(Arc::new(
            SqliteKvStore::in_memory().unwrap(),
        )));
        Session::new(
            gateway,
            resolver,
            OrderSizer::default(),
            "DU1234567".to_string(),
            CancellationToken::new(),
        )
    }

    fn contract(id: i64, symbol: &str) -> Contract {
        Contract {
            instrument_id: id,
            symbol: symbol.to_string(),
            local_symbol: symbol.to_string(),
            kind: SecurityKind::Equity,
            multiplier: Decimal::ONE,
            currency: "USD".to_string(),
            exchange: Some("SMART".to_string()),
            min_tick: DEFAULT_MIN_TICK,
            legs: Vec::new(),
        }
    }

    #[test]
    fn sandbox_latch_ignores_aggregate_rows() {
        let session = session_with(Arc::new(MockGateway::new()));
        assert_eq!(session.level_name(), "undecided");

        session.note_account("All");
        assert_eq!(session.is_sandbox(), None);

        session.note_account("DU1234567");
        assert_eq!(session.is_sandbox(), Some(true));
        assert_eq!(session.level_name(), "paper");

        // First decision wins.
        session.note_account("U7654321");
        assert_eq!(session.is_sandbox(), Some(true));
    }

    #[test]
    fn ledger_derives_buying_power_tiers() {
        let mut ledger = AccountLedger::default();
        ledger.apply_summary("BuyingPower", "10000");

        assert_eq!(ledger.get("BuyingPower4"), Some(dec!(10000)));
        assert_eq!(ledger.get("BuyingPower3"), Some(dec!(7500)));
        assert_eq!(ledger.get("BuyingPower2"), Some(dec!(5000)));
    }

    #[test]
    fn ledger_derives_pnl_percentages() {
        let mut ledger = AccountLedger::default();
        ledger.apply_pnl(dec!(100), dec!(500), dec!(250));
        ledger.apply_summary("NetLiquidation", "10250");

        // 250 / (10250 - 250) * 100
        assert_eq!(ledger.get("RealizedPnL%"), Some(dec!(2.5)));
        assert_eq!(ledger.get("DailyPnL"), Some(dec!(100)));
    }

    #[test]
    fn glob_matching_caps_quantity_with_position_sign() {
        let session = session_with(Arc::new(MockGateway::new()));

        session.upsert_position(PositionRow {
            contract: contract(1, "AAPL"),
            quantity: dec!(-50),
            market_price: dec!(180),
            average_cost: dec!(170),
        });
        session.upsert_position(PositionRow {
            contract: contract(2, "AMD"),
            quantity: dec!(30),
            market_price: dec!(150),
            average_cost: dec!(140),
        });

        // Glob hits both, full size.
        let all = session.positions_matching("A*", None);
        assert_eq!(all.len(), 2);

        // Requested quantity caps and keeps the short sign.
        let capped = session.positions_matching("AAPL", Some(dec!(10)));
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].1, dec!(-10));

        // Oversized requests truncate to the position.
        let truncated = session.positions_matching("AMD", Some(dec!(100)));
        assert_eq!(truncated[0].1, dec!(30));
    }

    #[tokio::test]
    async fn add_quote_resolves_and_subscribes() {
        let gateway = Arc::new(MockGateway::new());
        gateway.add_instrument(contract(9, "SPY"));
        let session = session_with(Arc::clone(&gateway));

        let key = session.add_quote("spy").await.unwrap();
        assert_eq!(key, "SPY");
        assert!(session.quotes.contains("SPY"));
    }

    #[tokio::test]
    async fn add_quote_reports_unknown_symbols() {
        let gateway = Arc::new(MockGateway::new());
        let session = session_with(gateway);

        let result = session.add_quote("TYPO").await;
        assert!(matches!(result, Err(AddQuoteError::Resolution(_))));
    }

    #[tokio::test]
    async fn unqualified_contract_is_never_submitted() {
        let gateway = Arc::new(MockGateway::new());
        let session = session_with(Arc::clone(&gateway));

        let bad = contract(0, "TYPO");
        let result = session
            .place_order_for_contract(&bad, OrderSide::Buy, dec!(10), dec!(5), false)
            .await;

        assert!(matches!(result, Err(PlaceOrderError::Unqualified(_))));
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn placed_order_is_tracked() {
        let gateway = Arc::new(MockGateway::new());
        let session = session_with(Arc::clone(&gateway));

        let trade = session
            .place_order_for_contract(&contract(3, "SPY"), OrderSide::Buy, dec!(10), dec!(500), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.open_orders().len(), 1);
        assert_eq!(gateway.placed_orders().len(), 1);
        assert_eq!(trade.remaining, dec!(10));
    }

    #[tokio::test]
    async fn preview_does_not_submit() {
        let gateway = Arc::new(MockGateway::new());
        let session = session_with(Arc::clone(&gateway));

        let result = session
            .place_order_for_contract(&contract(3, "SPY"), OrderSide::Buy, dec!(10), dec!(500), true)
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(gateway.placed_orders().is_empty());
        assert!(session.open_orders().is_empty());
    }

    #[test]
    fn crypto_buy_gets_minutes_tif() {
        // Policy table wiring: the ticket derives TIF from the class.
        assert_eq!(
            SecurityKind::Crypto.default_tif(OrderSide::Buy),
            TimeInForce::Minutes
        );
        assert_eq!(
            SecurityKind::Crypto.default_tif(OrderSide::Sell),
            TimeInForce::Gtc
        );
    }

    #[test]
    fn clear_transient_wipes_reconnect_state() {
        let session = session_with(Arc::new(MockGateway::new()));

        session.upsert_position(PositionRow {
            contract: contract(1, "AAPL"),
            quantity: dec!(5),
            market_price: dec!(180),
            average_cost: dec!(170),
        });
        session.track_order(TradeState {
            order_id: 7,
            contract: contract(1, "AAPL"),
            ticket: OrderTicket::limit(7, OrderSide::Buy, dec!(5), dec!(180)),
            status: OrderStatusKind::Submitted,
            filled: Decimal::ZERO,
            remaining: dec!(5),
            avg_fill_price: Decimal::ZERO,
        });
        session.record_position_pnl(1, dec!(10), dec!(20));

        session.clear_transient();

        assert!(session.positions().is_empty());
        assert!(session.open_orders().is_empty());
        assert!(session.with_ledger(|l| l.get("DailyPnL").is_none()));
    }
}
