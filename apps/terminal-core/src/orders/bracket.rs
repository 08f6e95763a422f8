//! Bracket order construction.
//!
//! A bracket is a parent entry order with dependent exit orders that
//! activate once the parent fills. The parent carries a pre-allocated
//! order id so the children can reference it before anything is
//! submitted; the parent is staged non-transmitting and the final
//! transmitted child activates the whole group atomically at the
//! gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instruments::{Contract, TickRounding};

use super::{OrderSide, OrderTicket, OrderType, TimeInForce};

/// Bracket construction failure.
#[derive(Debug, thiserror::Error)]
pub enum BracketError {
    /// Entry inputs out of range.
    #[error("invalid bracket input: {0}")]
    Invalid(String),
}

/// Bracket policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketConfig {
    /// Whether the computed stop-loss leg is submitted. Off by default:
    /// the bracket runs profit-only and the stop leg is returned for
    /// inspection but withheld from the gateway.
    pub submit_stop_loss: bool,
    /// Offset applied to the profit leg's limit when its trail
    /// triggers.
    pub profit_limit_offset: Decimal,
    /// Points past the quoted side for the parent's opening limit.
    pub open_limit_offset: Decimal,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            submit_stop_loss: false,
            profit_limit_offset: Decimal::new(75, 2),
            open_limit_offset: Decimal::ONE,
        }
    }
}

/// A constructed bracket: entry, profit taker, and the (possibly
/// withheld) stop loss.
#[derive(Debug, Clone)]
pub struct BracketOrders {
    /// Tag correlating the group's log lines.
    pub bracket_id: String,
    /// Entry order, non-transmitting.
    pub parent: OrderTicket,
    /// Trailing profit taker, references the parent.
    pub profit: OrderTicket,
    /// Protective stop, references the parent. Submitted only when
    /// [`BracketConfig::submit_stop_loss`] is set.
    pub stop: OrderTicket,
    submit_stop: bool,
}

impl BracketOrders {
    /// The tickets to actually submit, in submission order.
    #[must_use]
    pub fn to_submit(&self) -> Vec<&OrderTicket> {
        if self.submit_stop {
            vec![&self.parent, &self.profit, &self.stop]
        } else {
            vec![&self.parent, &self.profit]
        }
    }
}

/// Symmetric percent-difference band around a price.
///
/// Bounds are placed so the percent difference between price and bound
/// equals `pct` on both sides (`pct` fractional, e.g. `0.03`).
#[must_use]
pub(crate) fn bounds_by_percent_difference(price: Decimal, pct: Decimal) -> (Decimal, Decimal) {
    let two = Decimal::TWO;
    let lower = price * (two - pct) / (two + pct);
    let upper = price * (two + pct) / (two - pct);
    (lower, upper)
}

/// Builds linked parent/profit/stop order triples.
#[derive(Debug, Default)]
pub struct BracketBuilder {
    config: BracketConfig,
}

impl BracketBuilder {
    /// Builder with explicit policy.
    #[must_use]
    pub const fn with_config(config: BracketConfig) -> Self {
        Self { config }
    }

    /// Construct a bracket around the current quoted price.
    ///
    /// `entry_price` is the quoted side being crossed (the ask for a
    /// long entry, the bid for a short). `risk_pct` sets the symmetric
    /// band the exits are derived from. `next_id` allocates gateway
    /// order ids; the parent takes the first.
    pub fn build(
        &self,
        contract: &Contract,
        side: OrderSide,
        quantity: Decimal,
        entry_price: Decimal,
        risk_pct: Decimal,
        mut next_id: impl FnMut() -> i64,
    ) -> Result<BracketOrders, BracketError> {
        if quantity <= Decimal::ZERO {
            return Err(BracketError::Invalid(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if entry_price <= Decimal::ZERO {
            return Err(BracketError::Invalid(format!(
                "entry price must be positive, got {entry_price}"
            )));
        }
        if risk_pct <= Decimal::ZERO {
            return Err(BracketError::Invalid(format!(
                "risk percent must be positive, got {risk_pct}"
            )));
        }

        let (lower, upper) = bounds_by_percent_difference(entry_price, risk_pct);

        let (loss_price, trail_distance, open_limit) = match side {
            OrderSide::Buy => (
                contract.align_price(lower, TickRounding::Nearest),
                contract.align_price(entry_price - lower, TickRounding::Nearest),
                entry_price + self.config.open_limit_offset,
            ),
            OrderSide::Sell => (
                contract.align_price(upper, TickRounding::Nearest),
                contract.align_price(upper - entry_price, TickRounding::Nearest),
                entry_price - self.config.open_limit_offset,
            ),
        };

        let parent_id = next_id();
        let close_side = side.inverse();

        let parent = OrderTicket {
            order_id: parent_id,
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: Some(open_limit),
            aux_price: None,
            trail_stop_price: None,
            limit_price_offset: None,
            parent_id: None,
            transmit: false,
            outside_rth: true,
            tif: TimeInForce::Gtc,
        };

        let profit = OrderTicket {
            order_id: next_id(),
            side: close_side,
            quantity,
            order_type: OrderType::TrailLimit,
            limit_price: None,
            // Trailing amount before the stop triggers.
            aux_price: Some(trail_distance),
            // Initial trigger level if price moves against immediately.
            trail_stop_price: Some(loss_price),
            limit_price_offset: Some(self.config.profit_limit_offset),
            parent_id: Some(parent_id),
            transmit: true,
            outside_rth: true,
            tif: TimeInForce::Gtc,
        };

        let stop = OrderTicket {
            order_id: next_id(),
            side: close_side,
            quantity,
            order_type: OrderType::StopProtect,
            limit_price: None,
            aux_price: Some(loss_price),
            trail_stop_price: None,
            limit_price_offset: None,
            parent_id: Some(parent_id),
            transmit: true,
            outside_rth: false,
            tif: TimeInForce::Gtc,
        };

        Ok(BracketOrders {
            bracket_id: format!("bracket-{}", uuid::Uuid::new_v4()),
            parent,
            profit,
            stop,
            submit_stop: self.config.submit_stop_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::{DEFAULT_MIN_TICK, SecurityKind};
    use rust_decimal_macros::dec;

    fn contract() -> Contract {
        Contract {
            instrument_id: 1,
            symbol: "SPY".to_string(),
            local_symbol: "SPY".to_string(),
            kind: SecurityKind::Equity,
            multiplier: Decimal::ONE,
            currency: "USD".to_string(),
            exchange: Some("SMART".to_string()),
            min_tick: DEFAULT_MIN_TICK,
            legs: Vec::new(),
        }
    }

    fn sequential_ids() -> impl FnMut() -> i64 {
        let mut next = 100;
        move || {
            next += 1;
            next
        }
    }

    #[test]
    fn children_reference_the_parent() {
        let bracket = BracketBuilder::default()
            .build(
                &contract(),
                OrderSide::Buy,
                dec!(10),
                dec!(500),
                dec!(0.03),
                sequential_ids(),
            )
            .unwrap();

        assert_eq!(bracket.profit.parent_id, Some(bracket.parent.order_id));
        assert_eq!(bracket.stop.parent_id, Some(bracket.parent.order_id));
        assert_ne!(bracket.profit.order_id, bracket.parent.order_id);
    }

    #[test]
    fn long_stop_sits_below_entry() {
        let bracket = BracketBuilder::default()
            .build(
                &contract(),
                OrderSide::Buy,
                dec!(10),
                dec!(500),
                dec!(0.03),
                sequential_ids(),
            )
            .unwrap();

        let stop_price = bracket.stop.aux_price.unwrap();
        assert!(stop_price < dec!(500));
        // Opening limit crosses one point above the ask.
        assert_eq!(bracket.parent.limit_price, Some(dec!(501)));
        assert_eq!(bracket.parent.side, OrderSide::Buy);
        assert_eq!(bracket.profit.side, OrderSide::Sell);
    }

    #[test]
    fn short_stop_sits_above_entry() {
        let bracket = BracketBuilder::default()
            .build(
                &contract(),
                OrderSide::Sell,
                dec!(10),
                dec!(500),
                dec!(0.03),
                sequential_ids(),
            )
            .unwrap();

        assert!(bracket.stop.aux_price.unwrap() > dec!(500));
        assert_eq!(bracket.parent.limit_price, Some(dec!(499)));
        assert_eq!(bracket.profit.side, OrderSide::Buy);
    }

    #[test]
    fn parent_is_staged_and_children_transmit() {
        let bracket = BracketBuilder::default()
            .build(
                &contract(),
                OrderSide::Buy,
                dec!(1),
                dec!(100),
                dec!(0.02),
                sequential_ids(),
            )
            .unwrap();

        assert!(!bracket.parent.transmit);
        assert!(bracket.profit.transmit);
    }

    #[test]
    fn stop_leg_is_withheld_by_default() {
        let bracket = BracketBuilder::default()
            .build(
                &contract(),
                OrderSide::Buy,
                dec!(1),
                dec!(100),
                dec!(0.02),
                sequential_ids(),
            )
            .unwrap();

        let submitted = bracket.to_submit();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].order_id, bracket.parent.order_id);
    }

    #[test]
    fn stop_leg_submits_when_enabled() {
        let builder = BracketBuilder::with_config(BracketConfig {
            submit_stop_loss: true,
            ..Default::default()
        });
        let bracket = builder
            .build(
                &contract(),
                OrderSide::Buy,
                dec!(1),
                dec!(100),
                dec!(0.02),
                sequential_ids(),
            )
            .unwrap();

        assert_eq!(bracket.to_submit().len(), 3);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let result = BracketBuilder::default().build(
            &contract(),
            OrderSide::Buy,
            Decimal::ZERO,
            dec!(100),
            dec!(0.02),
            sequential_ids(),
        );
        assert!(matches!(result, Err(BracketError::Invalid(_))));
    }

    #[test]
    fn band_is_symmetric_in_percent_difference() {
        let (lower, upper) = bounds_by_percent_difference(dec!(100), dec!(0.04));
        assert!(lower < dec!(100) && upper > dec!(100));
        // lower * upper == price^2 for this band construction.
        let product = (lower * upper).round_dp(6);
        assert_eq!(product, dec!(10000).round_dp(6));
    }
}
