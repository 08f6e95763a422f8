//! Dynamic order sizing and pricing.
//!
//! Turns an order request into a concrete `(quantity, limit price)`
//! pair. Explicit values pass through (tick-aligned); a negative
//! quantity is a dollar budget to be converted at a live-derived price,
//! which may require waiting briefly for a fresh quote subscription to
//! populate.

use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::gateway::{GatewayError, GatewayPort};
use crate::instruments::{Contract, TickRounding};
use crate::orders::OrderSide;
use crate::quotes::QuoteRegistry;

/// Gateway rejects quantities with more than 8 fractional digits.
const QUANTITY_DECIMALS: u32 = 8;

/// Sizing policy knobs. The quote wait is deliberately short and
/// bounded: sizing either gets a usable quote quickly or fails the one
/// order, it never hangs the terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    /// Interval between quote polls.
    pub quote_poll_interval: Duration,
    /// Polls before giving up.
    pub quote_poll_attempts: u32,
    /// How far past fair value non-option entries bid for a fill
    /// (fractional, e.g. `0.005` = 0.5%).
    pub entry_bias_pct: Decimal,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            quote_poll_interval: Duration::from_millis(33),
            quote_poll_attempts: 10,
            entry_bias_pct: dec!(0.005),
        }
    }
}

/// Sizing failure; aborts the one order operation it belongs to.
#[derive(Debug, thiserror::Error)]
pub enum SizingError {
    /// No usable quote arrived within the poll budget.
    #[error("no usable quote for {key} after {attempts} attempts")]
    QuoteTimeout {
        /// Subscription key that never populated.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The wait was cancelled externally.
    #[error("cancelled while waiting for quote")]
    Cancelled,

    /// The dollar budget buys less than the minimum order.
    #[error("non-positive quantity for ${amount} at {price}")]
    NonPositiveQuantity {
        /// Requested dollar budget.
        amount: Decimal,
        /// Price used for the conversion.
        price: Decimal,
    },

    /// Neither a price nor a quantity to work with.
    #[error("order request has no quantity")]
    MissingQuantity,

    /// Gateway failure while subscribing for the needed quote.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Concrete sizing outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedOrder {
    /// Units to trade, always positive.
    pub quantity: Decimal,
    /// Limit price; zero when the request had no price (market-style).
    pub limit_price: Decimal,
}

/// Derives order quantity and price from requests.
#[derive(Debug, Clone, Default)]
pub struct OrderSizer {
    config: SizerConfig,
}

impl OrderSizer {
    /// Sizer with explicit policy.
    #[must_use]
    pub const fn with_config(config: SizerConfig) -> Self {
        Self { config }
    }

    /// Derive `(quantity, price)` for one order leg.
    ///
    /// `quantity` follows the request convention: positive means units,
    /// negative means an absolute dollar budget (direction is carried
    /// by `side`, never by the sign). `price` of zero means no explicit
    /// limit was given.
    pub async fn derive(
        &self,
        gateway: &dyn GatewayPort,
        quotes: &QuoteRegistry,
        contract: &Contract,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<SizedOrder, SizingError> {
        if price > Decimal::ZERO {
            let limit = contract.align_price(price, TickRounding::Nearest);

            if quantity > Decimal::ZERO {
                return Ok(SizedOrder {
                    quantity,
                    limit_price: limit,
                });
            }
            if quantity < Decimal::ZERO {
                // Dollar budget at the caller's price: no quote needed.
                let amount = quantity.abs();
                let sized = quantity_for_amount(contract, amount, limit)?;
                return Ok(SizedOrder {
                    quantity: sized,
                    limit_price: limit,
                });
            }
            return Err(SizingError::MissingQuantity);
        }

        if quantity > Decimal::ZERO {
            // Unpriced unit quantity: market-style order.
            return Ok(SizedOrder {
                quantity,
                limit_price: Decimal::ZERO,
            });
        }
        if quantity.is_zero() {
            return Err(SizingError::MissingQuantity);
        }

        // Negative quantity, no price: size the dollar budget at a
        // quote-derived entry price.
        let amount = quantity.abs();
        let (bid, ask) = self.wait_for_quote(gateway, quotes, contract, cancel).await?;
        let limit = self.entry_limit_price(contract, side, bid, ask);

        tracing::info!(
            symbol = %contract.display_symbol(),
            %amount,
            price = %limit,
            "Sizing dollar budget at derived price"
        );

        let sized = quantity_for_amount(contract, amount, limit)?;

        tracing::info!(
            symbol = %contract.display_symbol(),
            quantity = %sized,
            price = %limit,
            notional = %(sized * limit * contract.multiplier),
            "Sized order"
        );

        Ok(SizedOrder {
            quantity: sized,
            limit_price: limit,
        })
    }

    /// Poll for a usable quote, subscribing first if needed.
    pub(crate) async fn wait_for_quote(
        &self,
        gateway: &dyn GatewayPort,
        quotes: &QuoteRegistry,
        contract: &Contract,
        cancel: &CancellationToken,
    ) -> Result<(Decimal, Decimal), SizingError> {
        let key = quotes.subscribe(gateway, contract).await?;

        let mut remaining = self.config.quote_poll_attempts;
        loop {
            if cancel.is_cancelled() {
                tracing::warn!(key = %key, "Cancelled waiting for quote");
                return Err(SizingError::Cancelled);
            }

            if let Some(quote) = quotes.get(&key) {
                return Ok(quote);
            }

            if remaining == 0 {
                tracing::error!(key = %key, "Never received usable quote prices");
                return Err(SizingError::QuoteTimeout {
                    key,
                    attempts: self.config.quote_poll_attempts,
                });
            }
            tracing::warn!(key = %key, remaining, "Waiting for quote to populate...");
            remaining -= 1;

            tokio::select! {
                () = tokio::time::sleep(self.config.quote_poll_interval) => {}
                () = cancel.cancelled() => {
                    tracing::warn!(key = %key, "Cancelled waiting for quote");
                    return Err(SizingError::Cancelled);
                }
            }
        }
    }

    /// Entry limit price from the current quote.
    ///
    /// Options keep the plain midpoint (their spreads are wide and
    /// quotes comparatively stable), with a half-ask fallback when the
    /// bid is empty. Everything else widens past fair value in the
    /// entry direction: acquiring a position means crossing the spread,
    /// not resting at it, so buys price high and sells price low.
    fn entry_limit_price(
        &self,
        contract: &Contract,
        side: OrderSide,
        bid: Decimal,
        ask: Decimal,
    ) -> Decimal {
        if contract.kind.multiplier_in_cost() {
            let mid = if bid > Decimal::ZERO {
                (bid + ask) / Decimal::TWO
            } else {
                ask / Decimal::TWO
            };
            return contract.align_price(mid, TickRounding::Nearest);
        }

        let bid = if bid > Decimal::ZERO {
            bid
        } else {
            tracing::warn!(
                symbol = %contract.display_symbol(),
                "No bid price, using ask for both sides"
            );
            ask
        };

        let mid = (bid + ask) / Decimal::TWO;
        match side {
            OrderSide::Buy => {
                let widened = mid * (Decimal::ONE + self.config.entry_bias_pct);
                contract.align_price(widened, TickRounding::Up)
            }
            OrderSide::Sell => {
                let widened = mid * (Decimal::ONE - self.config.entry_bias_pct);
                contract.align_price(widened, TickRounding::Down)
            }
        }
    }
}

/// Convert a dollar budget into a valid order quantity at `price`.
///
/// The contract multiplier is part of the cost only for options; the
/// result is clamped to 8 decimals and floored to an integer unless the
/// asset class supports fractional quantities.
pub fn quantity_for_amount(
    contract: &Contract,
    amount: Decimal,
    price: Decimal,
) -> Result<Decimal, SizingError> {
    let multiplier = if contract.kind.multiplier_in_cost() {
        contract.multiplier
    } else {
        Decimal::ONE
    };

    let unit_cost = price * multiplier;
    if unit_cost <= Decimal::ZERO {
        return Err(SizingError::NonPositiveQuantity { amount, price });
    }

    let mut quantity = (amount / unit_cost)
        .round_dp_with_strategy(QUANTITY_DECIMALS, RoundingStrategy::MidpointAwayFromZero);

    if !contract.kind.fractional_quantities() {
        quantity = quantity.floor();
    }

    if quantity <= Decimal::ZERO {
        return Err(SizingError::NonPositiveQuantity { amount, price });
    }

    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use crate::instruments::{DEFAULT_MIN_TICK, SecurityKind};
    use crate::quotes::QuoteTick;
    use std::sync::Arc;

    fn contract(kind: SecurityKind, multiplier: Decimal) -> Contract {
        Contract {
            instrument_id: 21,
            symbol: "TEST".to_string(),
            local_symbol: "TEST".to_string(),
            kind,
            multiplier,
            currency: "USD".to_string(),
            exchange: Some("SMART".to_string()),
            min_tick: DEFAULT_MIN_TICK,
            legs: Vec::new(),
        }
    }

    #[test]
    fn option_budget_counts_multiplier() {
        let c = contract(SecurityKind::Option, dec!(100));
        let qty = quantity_for_amount(&c, dec!(1000), dec!(2.50)).unwrap();
        assert_eq!(qty, dec!(4));
    }

    #[test]
    fn equity_budget_ignores_multiplier() {
        let c = contract(SecurityKind::Equity, Decimal::ONE);
        let qty = quantity_for_amount(&c, dec!(1000), dec!(50)).unwrap();
        assert_eq!(qty, dec!(20));
    }

    #[test]
    fn crypto_budget_keeps_fractional_quantity() {
        let c = contract(SecurityKind::Crypto, Decimal::ONE);
        let qty = quantity_for_amount(&c, dec!(1000), dec!(333.33)).unwrap();
        // Rounded to 8 decimals, not floored.
        assert_eq!(qty, dec!(3.00003000));
    }

    #[test]
    fn dust_budget_is_rejected() {
        let c = contract(SecurityKind::Equity, Decimal::ONE);
        let result = quantity_for_amount(&c, dec!(10), dec!(50));
        assert!(matches!(
            result,
            Err(SizingError::NonPositiveQuantity { .. })
        ));
    }

    #[tokio::test]
    async fn explicit_price_is_tick_aligned() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Equity, Decimal::ONE);

        let sized = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Buy,
                dec!(10),
                dec!(150.248),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sized.quantity, dec!(10));
        assert_eq!(sized.limit_price, dec!(150.25));
    }

    #[tokio::test]
    async fn dollar_budget_at_explicit_price_needs_no_quote() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Equity, Decimal::ONE);

        let sized = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Buy,
                dec!(-1000),
                dec!(50),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sized.quantity, dec!(20));
        assert_eq!(quotes.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quote_wait_is_bounded() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Equity, Decimal::ONE);

        let result = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Buy,
                dec!(-1000),
                Decimal::ZERO,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(SizingError::QuoteTimeout { attempts: 10, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn quote_arriving_mid_wait_completes_sizing() {
        let gateway = MockGateway::new();
        let quotes = Arc::new(QuoteRegistry::new());
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Equity, Decimal::ONE);

        let ticker = Arc::clone(&quotes);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            ticker.apply_tick(
                "TEST",
                QuoteTick {
                    bid: dec!(49.90),
                    ask: dec!(50.10),
                    ..Default::default()
                },
            );
        });

        let sized = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Buy,
                dec!(-1000),
                Decimal::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        handle.await.unwrap();

        // Midpoint 50.00 widened 0.5% up and tick-rounded up.
        assert_eq!(sized.limit_price, dec!(50.25));
        assert_eq!(sized.quantity, dec!(19));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unwinds_the_wait() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Equity, Decimal::ONE);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Buy,
                dec!(-1000),
                Decimal::ZERO,
                &cancel,
            )
            .await;
        handle.await.unwrap();

        assert!(matches!(result, Err(SizingError::Cancelled)));
        // The registry still tracks the subscription; nothing was torn
        // down mid-flight.
        assert_eq!(quotes.len(), 1);
    }

    #[tokio::test]
    async fn option_midpoint_is_unwidened() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Option, dec!(100));

        quotes.subscribe(&gateway, &c).await.unwrap();
        quotes.apply_tick(
            "TEST",
            QuoteTick {
                bid: dec!(2.40),
                ask: dec!(2.60),
                ..Default::default()
            },
        );

        let sized = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Buy,
                dec!(-1000),
                Decimal::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sized.limit_price, dec!(2.50));
        assert_eq!(sized.quantity, dec!(4));
    }

    #[tokio::test]
    async fn option_with_no_bid_prices_off_half_ask() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Option, dec!(100));

        quotes.subscribe(&gateway, &c).await.unwrap();
        quotes.apply_tick(
            "TEST",
            QuoteTick {
                bid: Decimal::ZERO,
                ask: dec!(3.00),
                ..Default::default()
            },
        );

        let sized = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Sell,
                dec!(-300),
                Decimal::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sized.limit_price, dec!(1.50));
        assert_eq!(sized.quantity, dec!(2));
    }

    #[tokio::test]
    async fn sell_bias_widens_downward() {
        let gateway = MockGateway::new();
        let quotes = QuoteRegistry::new();
        let sizer = OrderSizer::default();
        let c = contract(SecurityKind::Equity, Decimal::ONE);

        quotes.subscribe(&gateway, &c).await.unwrap();
        quotes.apply_tick(
            "TEST",
            QuoteTick {
                bid: dec!(99.90),
                ask: dec!(100.10),
                ..Default::default()
            },
        );

        let sized = sizer
            .derive(
                &gateway,
                &quotes,
                &c,
                OrderSide::Sell,
                dec!(-1000),
                Decimal::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Midpoint 100.00 widened 0.5% down and tick-rounded down.
        assert_eq!(sized.limit_price, dec!(99.50));
        assert_eq!(sized.quantity, dec!(10));
    }
}
