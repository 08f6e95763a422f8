//! Environment-driven settings.
//!
//! The terminal is launched from a shell, so configuration rides on
//! environment variables with sensible defaults. Component-level
//! policy structs (`SizerConfig`, `BracketConfig`, `SupervisorConfig`)
//! keep their own defaults; this module only overrides what the
//! environment names.

use std::path::PathBuf;

use crate::orders::BracketConfig;
use crate::session::SupervisorConfig;
use crate::sizing::SizerConfig;

/// Fully assembled terminal settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Account the session binds to.
    pub account_id: String,
    /// Path of the durable instrument cache.
    pub cache_path: PathBuf,
    /// Connection supervision settings.
    pub supervisor: SupervisorConfig,
    /// Sizing policy.
    pub sizer: SizerConfig,
    /// Bracket policy.
    pub bracket: BracketConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            cache_path: PathBuf::from("./cache-contracts.db"),
            supervisor: SupervisorConfig::default(),
            sizer: SizerConfig::default(),
            bracket: BracketConfig::default(),
        }
    }
}

impl Settings {
    /// Build settings from environment variables.
    ///
    /// - `HELM_ACCOUNT`: account id (default: empty, gateway default)
    /// - `HELM_CACHE_PATH`: cache database path
    /// - `HELM_GATEWAY_HOST` / `HELM_GATEWAY_PORT`: gateway endpoint
    /// - `HELM_CLIENT_ID`: API client id (must be unique per gateway)
    /// - `HELM_SUBMIT_STOP_LOSS`: set to `true`/`1` to submit the
    ///   bracket stop leg instead of withholding it
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(account) = std::env::var("HELM_ACCOUNT") {
            settings.account_id = account;
        }
        if let Ok(path) = std::env::var("HELM_CACHE_PATH") {
            settings.cache_path = PathBuf::from(path);
        }
        if let Ok(host) = std::env::var("HELM_GATEWAY_HOST") {
            settings.supervisor.host = host;
        }
        if let Ok(port) = std::env::var("HELM_GATEWAY_PORT") {
            match port.parse() {
                Ok(port) => settings.supervisor.port = port,
                Err(_) => tracing::warn!(%port, "Ignoring unparseable HELM_GATEWAY_PORT"),
            }
        }
        if let Ok(client_id) = std::env::var("HELM_CLIENT_ID") {
            match client_id.parse() {
                Ok(client_id) => settings.supervisor.client_id = client_id,
                Err(_) => tracing::warn!(%client_id, "Ignoring unparseable HELM_CLIENT_ID"),
            }
        }
        if let Ok(flag) = std::env::var("HELM_SUBMIT_STOP_LOSS") {
            settings.bracket.submit_stop_loss = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        settings
    }
}
