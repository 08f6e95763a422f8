//! Gateway push-event handling.
//!
//! Every push event flows through [`Session::apply_event`] on the
//! session's single scheduling context. Disconnect events are not
//! handled here; the connection supervisor owns reconnection.

use rust_decimal::Decimal;

use crate::gateway::GatewayEvent;

use super::Session;

/// Gateway status codes that are informational at startup, not errors.
const BENIGN_STATUS_CODES: &[i32] = &[1102, 2104, 2106, 2158, 202];

impl Session {
    /// Apply one gateway push event to session state.
    pub async fn apply_event(&self, event: GatewayEvent) {
        match event {
            // The supervisor reacts to disconnects; nothing to do here.
            GatewayEvent::Disconnected => {}

            GatewayEvent::AccountSummary {
                account,
                tag,
                value,
            } => {
                self.note_account(&account);
                self.ledger.write().apply_summary(&tag, &value);
            }

            GatewayEvent::Pnl {
                daily,
                unrealized,
                realized,
            } => {
                self.ledger.write().apply_pnl(daily, unrealized, realized);
            }

            GatewayEvent::PositionPnl {
                instrument_id,
                daily,
                unrealized,
            } => {
                self.record_position_pnl(instrument_id, daily, unrealized);
            }

            GatewayEvent::Portfolio(row) => {
                self.upsert_position(row);
            }

            GatewayEvent::OrderStatus(trade) => {
                // Skip the noise while the startup order snapshot loads.
                if self.is_connected() {
                    tracing::warn!(
                        order_id = trade.order_id,
                        status = ?trade.status,
                        symbol = %trade.contract.display_symbol(),
                        filled = %trade.filled,
                        remaining = %trade.remaining,
                        "Order update"
                    );
                }
                self.track_order(trade);
            }

            GatewayEvent::Execution {
                order_id,
                instrument_id,
                local_symbol,
                side,
                shares,
                price,
                cumulative_quantity,
            } => {
                tracing::warn!(
                    order_id,
                    symbol = %local_symbol,
                    side = %side,
                    %shares,
                    %price,
                    "Trade executed"
                );
                self.sync_position_pnl_subscription(instrument_id, cumulative_quantity)
                    .await;
            }

            GatewayEvent::Commission {
                order_id,
                local_symbol,
                commission,
                realized_pnl,
            } => {
                if !self.is_connected() {
                    tracing::warn!("Ignoring commission report while not connected");
                    return;
                }
                tracing::warn!(
                    order_id,
                    symbol = %local_symbol,
                    %commission,
                    realized_pnl = ?realized_pnl,
                    "Commission report"
                );
            }

            GatewayEvent::OrderCancelled { order_id, reason } => {
                tracing::warn!(order_id, reason = %reason, "Order canceled");
            }

            GatewayEvent::ApiError {
                order_id,
                code,
                message,
            } => {
                if BENIGN_STATUS_CODES.contains(&code) {
                    tracing::info!(code, message = %message, "API status");
                } else {
                    tracing::error!(order_id, code, message = %message, "API error");
                }
            }

            GatewayEvent::NewsBulletin { message } => {
                tracing::warn!(message = %message, "News bulletin");
            }

            GatewayEvent::Quote { key, tick } => {
                self.quotes.apply_tick(&key, tick);
            }
        }
    }

    /// Keep the per-position PnL subscription set in step with fills:
    /// a position gaining quantity starts one, a position emptied out
    /// stops it.
    async fn sync_position_pnl_subscription(&self, instrument_id: i64, cumulative: Decimal) {
        if cumulative > Decimal::ZERO {
            let newly_tracked = self.position_pnl.lock().insert(instrument_id);
            if newly_tracked {
                if let Err(error) = self
                    .gateway()
                    .subscribe_position_pnl(self.account_id(), instrument_id)
                    .await
                {
                    tracing::warn!(instrument_id, %error, "Failed to subscribe position PnL");
                    self.position_pnl.lock().remove(&instrument_id);
                }
            }
        } else {
            let was_tracked = self.position_pnl.lock().remove(&instrument_id);
            if was_tracked {
                if let Err(error) = self.gateway().cancel_position_pnl(instrument_id).await {
                    tracing::warn!(instrument_id, %error, "Failed to cancel position PnL");
                }
            }
        }
    }
}
