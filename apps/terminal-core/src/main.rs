//! Terminal Core Binary
//!
//! Drives the execution core from standard input: each line is parsed
//! into sequential/concurrent command units and run against the live
//! session while the connection supervisor keeps the gateway session
//! alive underneath.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin terminal-core
//! ```
//!
//! # Environment Variables
//!
//! - `HELM_ACCOUNT`: account id to bind
//! - `HELM_GATEWAY_HOST` / `HELM_GATEWAY_PORT`: gateway endpoint
//! - `HELM_CLIENT_ID`: API client id
//! - `HELM_CACHE_PATH`: instrument cache path (default
//!   `./cache-contracts.db`)
//! - `HELM_SUBMIT_STOP_LOSS`: submit bracket stop legs (default off)
//! - `RUST_LOG`: log filter (default `info`)

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use terminal_core::commands::SessionCommands;
use terminal_core::config::Settings;
use terminal_core::gateway::{GatewayPort, mock::MockGateway};
use terminal_core::instruments::{ContractCache, InstrumentResolver};
use terminal_core::orders::BracketBuilder;
use terminal_core::scheduler;
use terminal_core::session::{ConnectionSupervisor, Session};
use terminal_core::sizing::OrderSizer;
use terminal_core::store::SqliteKvStore;
use terminal_core::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::from_env();
    tracing::info!(
        host = %settings.supervisor.host,
        port = settings.supervisor.port,
        cache = %settings.cache_path.display(),
        "Starting terminal core"
    );

    let store = Arc::new(SqliteKvStore::open(&settings.cache_path)?);
    let resolver = InstrumentResolver::new(ContractCache::new(store));

    // Wire protocol adapters register here; the in-process simulated
    // gateway keeps the terminal usable without one.
    let gateway: Arc<dyn GatewayPort> = Arc::new(MockGateway::new());
    tracing::warn!("No wire gateway adapter configured; using the simulated gateway");

    let exit = CancellationToken::new();
    let session = Arc::new(Session::new(
        gateway,
        resolver,
        OrderSizer::with_config(settings.sizer.clone()),
        settings.account_id.clone(),
        exit.clone(),
    ));

    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&session),
        settings.supervisor.clone(),
    ));
    let supervisor_task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    let commands = SessionCommands::new(
        Arc::clone(&session),
        BracketBuilder::with_config(settings.bracket.clone()),
    );

    run_repl(&session, &commands, &exit).await;

    session.request_exit();
    supervisor_task.await?;

    tracing::info!("Goodbye");
    Ok(())
}

/// Read command batches from stdin until EOF, exit, or interrupt.
async fn run_repl(session: &Session, commands: &SessionCommands, exit: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = signal::ctrl_c() => {
                tracing::info!("Interrupt: exiting");
                return;
            }
            () = exit.cancelled() => return,
        };

        match line {
            Ok(Some(text)) => {
                tracing::debug!(level = session.level_name(), input = %text, "Command input");
                let units = scheduler::schedule(&text);
                scheduler::execute(commands, units).await;

                if session.exit_requested() {
                    return;
                }
            }
            Ok(None) => {
                // EOF (Ctrl-D).
                tracing::info!("End of input: exiting");
                return;
            }
            Err(error) => {
                tracing::error!(%error, "Failed reading input");
                return;
            }
        }
    }
}
