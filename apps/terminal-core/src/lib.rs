// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Terminal Core - Execution Library
//!
//! The execution core of the Helm interactive trading terminal. It
//! maintains a resilient session against an external brokerage gateway
//! and turns user command batches into resolved, sized, and assembled
//! orders.
//!
//! # Architecture
//!
//! - [`store`]: durable namespaced key-value storage (SQLite)
//! - [`instruments`]: contract model, per-class trading policy, the
//!   durable contract cache, and the batch resolver
//! - [`gateway`]: the opaque async broker client port and its push
//!   event stream
//! - [`quotes`]: one live quote registry keyed by normalized symbol
//! - [`sizing`]: quantity/price derivation, including dollar-budget
//!   sizing against live quotes
//! - [`orders`]: order tickets, trade state, spread assembly, bracket
//!   construction
//! - [`session`]: process-wide state plus the connection supervisor
//! - [`scheduler`]: sequential/concurrent command batch execution
//! - [`commands`]: the named operations the scheduler dispatches
//!
//! All mutation happens on one cooperative scheduling context. The
//! registries guard their maps with short synchronous locks that are
//! never held across a suspension point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod commands;
pub mod config;
pub mod gateway;
pub mod instruments;
pub mod orders;
pub mod quotes;
pub mod scheduler;
pub mod session;
pub mod sizing;
pub mod store;
pub mod telemetry;

pub use commands::SessionCommands;
pub use config::Settings;
pub use gateway::{GatewayError, GatewayEvent, GatewayPort};
pub use instruments::{Contract, InstrumentResolver, SecurityKind, UnresolvedInstrument};
pub use orders::{BracketBuilder, OrderSide, OrderTicket, SpreadAssembler, TradeState};
pub use quotes::QuoteRegistry;
pub use session::{ConnectionSupervisor, Session, SessionState};
pub use sizing::OrderSizer;
pub use store::{KvStore, SqliteKvStore};
