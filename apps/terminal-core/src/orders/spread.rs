//! Multi-leg spread assembly.
//!
//! A spread is routed as one combination contract whose legs reference
//! other instruments by identity. The combination itself is never
//! qualified; each leg is resolved independently and the combination is
//! only built when every leg qualified.

use crate::gateway::{GatewayError, GatewayPort};
use crate::instruments::{
    ComboLeg, Contract, DEFAULT_MIN_TICK, InstrumentResolver, SecurityKind, UnresolvedInstrument,
};

use super::OrderSide;

/// One requested leg of a spread.
#[derive(Debug, Clone)]
pub struct LegRequest {
    /// Leg symbol (resolved independently).
    pub symbol: String,
    /// Buy or sell this leg.
    pub side: OrderSide,
    /// Size ratio within the combination.
    pub ratio: u32,
    /// Expected asset class of the leg.
    pub kind: SecurityKind,
}

/// Spread assembly failure.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// One or more legs failed to qualify; the combination must not be
    /// submitted partially assembled.
    #[error("{failed} of {total} legs failed to qualify")]
    LegsUnqualified {
        /// Count of failed legs.
        failed: usize,
        /// Total legs requested.
        total: usize,
    },

    /// The request had no legs.
    #[error("spread request has no legs")]
    Empty,

    /// Gateway transport failure during leg resolution.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Builds combination contracts from leg requests.
pub struct SpreadAssembler<'a> {
    resolver: &'a InstrumentResolver,
}

impl<'a> SpreadAssembler<'a> {
    /// Assemble over an instrument resolver.
    #[must_use]
    pub const fn new(resolver: &'a InstrumentResolver) -> Self {
        Self { resolver }
    }

    /// Resolve every leg and build the combination contract.
    ///
    /// The combination's nominal symbol comes from the first resolved
    /// leg. Each leg keeps its own resolution exchange: legs of a
    /// combination may route through different venues than the
    /// combination itself.
    pub async fn assemble(
        &self,
        gateway: &dyn GatewayPort,
        legs: &[LegRequest],
        exchange: &str,
        currency: &str,
    ) -> Result<Contract, AssemblyError> {
        if legs.is_empty() {
            return Err(AssemblyError::Empty);
        }

        let inputs: Vec<UnresolvedInstrument> = legs
            .iter()
            .map(|leg| UnresolvedInstrument::new(&leg.symbol, leg.kind, exchange, currency))
            .collect();

        let resolved = self.resolver.resolve(gateway, &inputs).await?;

        let mut failed = 0usize;
        for (leg, slot) in legs.iter().zip(&resolved) {
            if let Err(error) = slot {
                failed += 1;
                tracing::error!(symbol = %leg.symbol, %error, "Spread leg failed to qualify");
            }
        }

        if failed > 0 {
            return Err(AssemblyError::LegsUnqualified {
                failed,
                total: legs.len(),
            });
        }

        let contracts: Vec<Contract> = resolved.into_iter().filter_map(Result::ok).collect();

        let combo_legs: Vec<ComboLeg> = contracts
            .iter()
            .zip(legs)
            .map(|(contract, request)| ComboLeg {
                instrument_id: contract.instrument_id,
                ratio: request.ratio,
                side: request.side,
                exchange: contract
                    .exchange
                    .clone()
                    .unwrap_or_else(|| exchange.to_string()),
            })
            .collect();

        // Route the combination through the last leg's venue when one
        // is known; future-option legs name real exchanges rather than
        // smart routing.
        let combo_exchange = contracts
            .last()
            .and_then(|contract| contract.exchange.clone())
            .unwrap_or_else(|| exchange.to_string());

        Ok(Contract {
            instrument_id: 0,
            symbol: contracts[0].symbol.clone(),
            local_symbol: String::new(),
            kind: SecurityKind::Combo,
            multiplier: contracts[0].multiplier,
            currency: currency.to_string(),
            exchange: Some(combo_exchange),
            min_tick: DEFAULT_MIN_TICK,
            legs: combo_legs,
        })
    }
}
