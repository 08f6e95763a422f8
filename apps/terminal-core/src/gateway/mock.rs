//! Scripted in-process gateway for tests.
//!
//! Returns canned responses without any network I/O. Tests register
//! known instruments, script connect failures, and push events onto the
//! broadcast stream to drive the session exactly like a live gateway
//! would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::instruments::{Contract, UnresolvedInstrument};
use crate::orders::{OrderStatusKind, OrderTicket, TradeState};
use crate::quotes::{QuoteTick, lookup_key};

use super::{GatewayError, GatewayEvent, GatewayPort, MarginEstimate};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scripted gateway double.
pub struct MockGateway {
    events_tx: broadcast::Sender<GatewayEvent>,
    instruments: Mutex<HashMap<String, Contract>>,
    connect_failures: Mutex<VecDeque<GatewayError>>,
    subscriptions: Mutex<Vec<String>>,
    placed: Mutex<Vec<(Contract, OrderTicket)>>,
    cancelled: Mutex<Vec<i64>>,
    position_pnl_subs: Mutex<Vec<i64>>,
    position_pnl_cancels: Mutex<Vec<i64>>,
    preview: Mutex<MarginEstimate>,
    qualify_calls: AtomicU32,
    connect_attempts: AtomicU32,
    account_subscription_requests: AtomicU32,
    order_ids: AtomicI64,
}

impl Default for MockGateway {
    fn default() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            events_tx,
            instruments: Mutex::new(HashMap::new()),
            connect_failures: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            position_pnl_subs: Mutex::new(Vec::new()),
            position_pnl_cancels: Mutex::new(Vec::new()),
            preview: Mutex::new(MarginEstimate::default()),
            qualify_calls: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
            account_subscription_requests: AtomicU32::new(0),
            order_ids: AtomicI64::new(1000),
        }
    }
}

impl MockGateway {
    /// Fresh mock with no known instruments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract the mock will qualify, addressable by both
    /// its base and venue symbols.
    pub fn add_instrument(&self, contract: Contract) {
        let mut instruments = self.instruments.lock();
        instruments.insert(contract.symbol.clone(), contract.clone());
        if !contract.local_symbol.is_empty() {
            instruments.insert(contract.local_symbol.clone(), contract);
        }
    }

    /// Script the next connect attempt to fail.
    pub fn fail_next_connect(&self, error: GatewayError) {
        self.connect_failures.lock().push_back(error);
    }

    /// Broadcast a gateway event to every consumer.
    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Broadcast a quote tick for a subscription key.
    pub fn emit_quote(&self, key: &str, tick: QuoteTick) {
        self.emit(GatewayEvent::Quote {
            key: key.to_string(),
            tick,
        });
    }

    /// Replace the canned preview estimate.
    pub fn set_preview(&self, estimate: MarginEstimate) {
        *self.preview.lock() = estimate;
    }

    /// Number of qualify round trips observed.
    #[must_use]
    pub fn qualify_calls(&self) -> u32 {
        self.qualify_calls.load(Ordering::SeqCst)
    }

    /// Number of connect attempts observed.
    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of account-subscription requests observed.
    #[must_use]
    pub fn account_subscription_requests(&self) -> u32 {
        self.account_subscription_requests.load(Ordering::SeqCst)
    }

    /// Number of quote subscriptions opened.
    #[must_use]
    pub fn quote_subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Subscription keys opened, in order.
    #[must_use]
    pub fn subscribed_keys(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Orders placed, in order.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<(Contract, OrderTicket)> {
        self.placed.lock().clone()
    }

    /// Order ids cancelled, in order.
    #[must_use]
    pub fn cancelled_orders(&self) -> Vec<i64> {
        self.cancelled.lock().clone()
    }

    /// Instrument ids with live per-position PnL subscriptions.
    #[must_use]
    pub fn position_pnl_subscriptions(&self) -> Vec<i64> {
        self.position_pnl_subs.lock().clone()
    }

    /// Instrument ids whose PnL subscription was cancelled.
    #[must_use]
    pub fn position_pnl_cancellations(&self) -> Vec<i64> {
        self.position_pnl_cancels.lock().clone()
    }
}

#[async_trait]
impl GatewayPort for MockGateway {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        _client_id: i32,
        _account: &str,
    ) -> Result<(), GatewayError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_failures.lock().pop_front() {
            return Err(error);
        }
        Ok(())
    }

    async fn qualify(
        &self,
        instruments: &[UnresolvedInstrument],
    ) -> Result<Vec<Contract>, GatewayError> {
        self.qualify_calls.fetch_add(1, Ordering::SeqCst);

        let known = self.instruments.lock();
        Ok(instruments
            .iter()
            .map(|raw| {
                let hit = known
                    .get(&raw.symbol)
                    .or_else(|| known.get(&raw.local_symbol));
                hit.cloned().unwrap_or_else(|| Contract {
                    instrument_id: 0,
                    symbol: raw.symbol.clone(),
                    local_symbol: String::new(),
                    kind: raw.kind,
                    multiplier: Decimal::ONE,
                    currency: raw.currency.clone(),
                    exchange: None,
                    min_tick: crate::instruments::DEFAULT_MIN_TICK,
                    legs: Vec::new(),
                })
            })
            .collect())
    }

    async fn subscribe_quote(&self, contract: &Contract) -> Result<(), GatewayError> {
        self.subscriptions.lock().push(lookup_key(contract));
        Ok(())
    }

    async fn place_order(
        &self,
        contract: &Contract,
        ticket: &OrderTicket,
    ) -> Result<TradeState, GatewayError> {
        self.placed.lock().push((contract.clone(), ticket.clone()));

        Ok(TradeState {
            order_id: ticket.order_id,
            contract: contract.clone(),
            ticket: ticket.clone(),
            status: OrderStatusKind::Submitted,
            filled: Decimal::ZERO,
            remaining: ticket.quantity,
            avg_fill_price: Decimal::ZERO,
        })
    }

    async fn preview_order(
        &self,
        _contract: &Contract,
        _ticket: &OrderTicket,
    ) -> Result<MarginEstimate, GatewayError> {
        Ok(self.preview.lock().clone())
    }

    async fn cancel_order(&self, order_id: i64) -> Result<(), GatewayError> {
        self.cancelled.lock().push(order_id);
        Ok(())
    }

    async fn request_account_subscriptions(&self, _account: &str) -> Result<(), GatewayError> {
        self.account_subscription_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_position_pnl(
        &self,
        _account: &str,
        instrument_id: i64,
    ) -> Result<(), GatewayError> {
        self.position_pnl_subs.lock().push(instrument_id);
        Ok(())
    }

    async fn cancel_position_pnl(&self, instrument_id: i64) -> Result<(), GatewayError> {
        self.position_pnl_cancels.lock().push(instrument_id);
        Ok(())
    }

    fn next_order_id(&self) -> i64 {
        self.order_ids.fetch_add(1, Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events_tx.subscribe()
    }
}
