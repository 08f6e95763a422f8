//! Gateway session lifecycle.
//!
//! The supervisor owns connect, disconnect detection, and reconnect
//! with a fixed backoff. No connect-time failure is fatal: transient
//! network errors retry quietly, anything unexpected is logged in full
//! and retried anyway. The only way out is an explicit exit request.
//!
//! On every successful (re)connect the quote registry is cleared and
//! rebuilt from the previously tracked contracts, per-session
//! account/position/order/PnL caches are wiped so no stale values
//! survive the reconnect, and account subscriptions are re-issued.
//! Event consumption is wired exactly once, outside the reconnect
//! loop, so reconnects never stack duplicate handlers.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::gateway::{GatewayError, GatewayEvent};

use super::{Session, SessionState};

/// Connection supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// API client id; must be unique per gateway connection.
    pub client_id: i32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 0,
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

/// Owns the gateway session lifecycle for one [`Session`].
pub struct ConnectionSupervisor {
    session: Arc<Session>,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    /// Supervise a session with the given settings.
    #[must_use]
    pub const fn new(session: Arc<Session>, config: SupervisorConfig) -> Self {
        Self { session, config }
    }

    /// Connect, then pump gateway events until exit.
    ///
    /// A disconnect event re-enters the reconnect loop; every other
    /// event is applied to session state in arrival order.
    pub async fn run(&self) {
        // Wired once, before the first connect: reconnects must not
        // accumulate duplicate consumers.
        let mut events = self.session.gateway().events();

        self.reconnect().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(GatewayEvent::Disconnected) => {
                        tracing::warn!("Gateway disconnected");
                        self.reconnect().await;
                    }
                    Ok(event) => self.session.apply_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event stream lagged; dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Gateway event stream closed");
                        break;
                    }
                },
                () = self.session.exit_token().cancelled() => break,
            }

            if self.session.exit_requested() {
                break;
            }
        }

        self.session.set_state(SessionState::Disconnected);
    }

    /// Connect-with-retry loop.
    ///
    /// Returns once connected, or immediately when an exit has been
    /// requested.
    pub async fn reconnect(&self) {
        if self.session.exit_requested() {
            return;
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "Connecting to gateway API..."
        );

        loop {
            self.session.set_state(SessionState::Connecting);

            match self.establish().await {
                Ok(()) => {
                    tracing::info!(account = %self.session.account_id(), "Connected");
                    return;
                }
                Err(error) if error.is_transient() => {
                    // Expected while the gateway restarts; no stack dump.
                    self.session.set_state(SessionState::Disconnected);
                    tracing::error!(%error, "Failed to connect to gateway, trying again...");
                }
                Err(error) => {
                    self.session.set_state(SessionState::Disconnected);
                    tracing::error!(?error, "Unexpected connect failure, trying again...");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_delay) => {}
                () = self.session.exit_token().cancelled() => {
                    tracing::warn!("Exit requested during reconnect delay. Goodbye.");
                    return;
                }
            }

            if self.session.exit_requested() {
                return;
            }
        }
    }

    /// One full connect: session, quote rebuild, cache reset, account
    /// subscriptions.
    async fn establish(&self) -> Result<(), GatewayError> {
        let gateway = self.session.gateway();

        gateway
            .connect(
                &self.config.host,
                self.config.port,
                self.config.client_id,
                self.session.account_id(),
            )
            .await?;

        self.session.set_state(SessionState::Connected);

        self.restore_quote_state().await?;

        // Reset cached account state so a reconnect never shows stale
        // values.
        self.session.clear_transient();

        gateway
            .request_account_subscriptions(self.session.account_id())
            .await?;

        Ok(())
    }

    /// Clear and rebuild every quote subscription tracked before the
    /// disconnect.
    async fn restore_quote_state(&self) -> Result<(), GatewayError> {
        let gateway = self.session.gateway();
        let contracts = self.session.quotes.contracts();

        tracing::info!(count = contracts.len(), "Restoring quote state...");
        self.session.quotes.clear();

        for contract in contracts {
            self.session.quotes.subscribe(gateway, &contract).await?;
        }

        tracing::info!("All quotes resubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use crate::instruments::{
        Contract, ContractCache, DEFAULT_MIN_TICK, InstrumentResolver, SecurityKind,
    };
    use crate::sizing::OrderSizer;
    use crate::store::SqliteKvStore;
    use rust_decimal::Decimal;
    use std::collections::BTreeSet;
    use tokio_util::sync::CancellationToken;

    fn session_with(gateway: Arc<MockGateway>, exit: CancellationToken) -> Arc<Session> {
        let resolver = InstrumentResolver::new(ContractCache::new(Arc::new(
            SqliteKvStore::in_memory().unwrap(),
        )));
        Arc::new(Session::new(
            gateway,
            resolver,
            OrderSizer::default(),
            "DU1234567".to_string(),
            exit,
        ))
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

    #[tokio::test]
    async fn reconnect_restores_exact_subscription_set() {
        let gateway = Arc::new(MockGateway::new());
        let session = session_with(Arc::clone(&gateway), CancellationToken::new());

        session
            .quotes
            .subscribe(session.gateway(), &contract(1, "AAPL"))
            .await
            .unwrap();
        session
            .quotes
            .subscribe(session.gateway(), &contract(2, "SPY"))
            .await
            .unwrap();

        let before: BTreeSet<String> = session.quotes.keys().into_iter().collect();

        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&session), SupervisorConfig::default());
        supervisor.reconnect().await;

        let after: BTreeSet<String> = session.quotes.keys().into_iter().collect();
        assert_eq!(before, after);
        assert_eq!(session.state(), SessionState::Connected);
        // Two original subscriptions plus two re-issued on reconnect.
        assert_eq!(gateway.quote_subscription_count(), 4);
        assert_eq!(gateway.account_subscription_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_until_success() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next_connect(GatewayError::ConnectionRefused);
        gateway.fail_next_connect(GatewayError::Timeout);

        let session = session_with(Arc::clone(&gateway), CancellationToken::new());
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&session), SupervisorConfig::default());

        supervisor.reconnect().await;

        assert_eq!(gateway.connect_attempts(), 3);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_failures_also_retry() {
        let gateway = Arc::new(MockGateway::new());
        gateway.fail_next_connect(GatewayError::Other("wat".to_string()));

        let session = session_with(Arc::clone(&gateway), CancellationToken::new());
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&session), SupervisorConfig::default());

        supervisor.reconnect().await;

        assert_eq!(gateway.connect_attempts(), 2);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn exit_request_stops_reconnecting() {
        let gateway = Arc::new(MockGateway::new());
        let exit = CancellationToken::new();
        exit.cancel();

        let session = session_with(Arc::clone(&gateway), exit);
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&session), SupervisorConfig::default());

        supervisor.reconnect().await;

        assert_eq!(gateway.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn run_routes_quote_events_into_the_registry() {
        let gateway = Arc::new(MockGateway::new());
        let exit = CancellationToken::new();
        let session = session_with(Arc::clone(&gateway), exit.clone());

        session
            .quotes
            .subscribe(session.gateway(), &contract(1, "AAPL"))
            .await
            .unwrap();

        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&session),
            SupervisorConfig::default(),
        ));
        let runner = Arc::clone(&supervisor);
        let handle = tokio::spawn(async move { runner.run().await });

        for _ in 0..50 {
            if session.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        gateway.emit_quote(
            "AAPL",
            crate::quotes::QuoteTick {
                bid: rust_decimal_macros::dec!(185.50),
                ask: rust_decimal_macros::dec!(185.52),
                ..Default::default()
            },
        );

        for _ in 0..50 {
            if session.quotes.get("AAPL").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(session.quotes.get("AAPL").is_some());

        exit.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_event_triggers_reconnect() {
        let gateway = Arc::new(MockGateway::new());
        let exit = CancellationToken::new();
        let session = session_with(Arc::clone(&gateway), exit.clone());

        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&session),
            SupervisorConfig::default(),
        ));
        let runner = Arc::clone(&supervisor);
        let handle = tokio::spawn(async move { runner.run().await });

        // Wait for the initial connect.
        for _ in 0..50 {
            if gateway.connect_attempts() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.connect_attempts(), 1);

        gateway.emit(GatewayEvent::Disconnected);

        for _ in 0..50 {
            if gateway.connect_attempts() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.connect_attempts(), 2);

        exit.cancel();
        handle.await.unwrap();
    }
}
