//! Named operations the scheduler dispatches against the session.
//!
//! The full order-request mini-language lives in the shell layer; the
//! operations here take simple whitespace-separated arguments. A
//! command failure aborts only that command: the scheduler logs it and
//! keeps going, and the interactive loop never dies on one.

use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::instruments::{Contract, SecurityKind, UnresolvedInstrument};
use crate::orders::{BracketBuilder, LegRequest, OrderSide, SpreadAssembler, amount_for_trade};
use crate::scheduler::{Command, CommandRunner};
use crate::session::Session;

/// Command dispatch bound to one session.
pub struct SessionCommands {
    session: Arc<Session>,
    brackets: BracketBuilder,
}

impl SessionCommands {
    /// Bind the command set to a session.
    #[must_use]
    pub fn new(session: Arc<Session>, brackets: BracketBuilder) -> Self {
        Self { session, brackets }
    }

    async fn resolve_symbol(&self, symbol: &str) -> anyhow::Result<Contract> {
        let raw = UnresolvedInstrument::equity(&clean_symbol(symbol));
        let slot = self
            .session
            .resolver
            .resolve_one(self.session.gateway(), &raw)
            .await
            .context("gateway qualify failed")?;
        slot.with_context(|| format!("symbol {symbol} did not qualify"))
    }

    async fn order(&self, side: OrderSide, args: &str, preview: bool) -> anyhow::Result<()> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let [symbol, quantity, price] = parts.as_slice() else {
            bail!("usage: buy|sell|preview SYMBOL QTY PRICE (negative QTY = dollar budget, PRICE 0 = derive)");
        };

        let contract = self.resolve_symbol(symbol).await?;
        let quantity = parse_decimal(quantity)?;
        let price = parse_decimal(price)?;

        self.session
            .place_order_for_contract(&contract, side, quantity, price, preview)
            .await?;
        Ok(())
    }

    async fn spread(&self, args: &str) -> anyhow::Result<()> {
        // spread buy 1 SYM1 sell 1 SYM2 [...] QTY PRICE
        let parts: Vec<&str> = args.split_whitespace().collect();
        if parts.len() < 5 {
            bail!("usage: spread (buy|sell RATIO SYMBOL)+ QTY PRICE");
        }

        let (leg_parts, tail) = parts.split_at(parts.len() - 2);
        if leg_parts.len() % 3 != 0 {
            bail!("spread legs come in (side, ratio, symbol) triples");
        }

        let legs: Vec<LegRequest> = leg_parts
            .chunks(3)
            .map(|chunk| {
                Ok(LegRequest {
                    side: parse_side(chunk[0])?,
                    ratio: chunk[1].parse().context("bad leg ratio")?,
                    symbol: clean_symbol(chunk[2]),
                    kind: SecurityKind::Option,
                })
            })
            .collect::<anyhow::Result<_>>()?;

        let assembler = SpreadAssembler::new(&self.session.resolver);
        let combo = assembler
            .assemble(self.session.gateway(), &legs, "SMART", "USD")
            .await?;

        let quantity = parse_decimal(tail[0])?;
        let price = parse_decimal(tail[1])?;

        self.session
            .place_order_for_contract(&combo, OrderSide::Buy, quantity, price, false)
            .await?;
        Ok(())
    }

    async fn bracket(&self, args: &str) -> anyhow::Result<()> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        let [side, symbol, quantity, risk_pct] = parts.as_slice() else {
            bail!("usage: bracket buy|sell SYMBOL QTY RISK_PCT (fractional, e.g. 0.03)");
        };

        let side = parse_side(side)?;
        let contract = self.resolve_symbol(symbol).await?;
        let quantity = parse_decimal(quantity)?;
        let risk_pct = parse_decimal(risk_pct)?;

        let (bid, ask) = self
            .session
            .sizer
            .wait_for_quote(
                self.session.gateway(),
                &self.session.quotes,
                &contract,
                self.session.exit_token(),
            )
            .await?;

        let entry = match side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        };

        let gateway = self.session.gateway();
        let bracket = self
            .brackets
            .build(&contract, side, quantity, entry, risk_pct, || {
                gateway.next_order_id()
            })?;

        for ticket in bracket.to_submit() {
            let trade = gateway.place_order(&contract, ticket).await?;
            tracing::info!(
                bracket = %bracket.bracket_id,
                order_id = trade.order_id,
                parent = ?ticket.parent_id,
                kind = ?ticket.order_type,
                "Bracket leg staged"
            );
        }
        Ok(())
    }

    fn orders(&self) {
        let open = self.session.open_orders();
        if open.is_empty() {
            tracing::info!("No tracked orders");
            return;
        }
        for trade in open {
            let amounts = amount_for_trade(&trade);
            tracing::info!(
                order_id = trade.order_id,
                symbol = %trade.contract.display_symbol(),
                status = ?trade.status,
                remaining = %amounts.remaining_quantity,
                remaining_amount = %amounts.remaining_amount,
                total_amount = %amounts.total_amount,
                "Open order"
            );
        }
    }

    fn positions(&self, pattern: Option<&str>) {
        let rows = self
            .session
            .positions_matching(pattern.unwrap_or("*"), None);
        if rows.is_empty() {
            tracing::info!("No matching positions");
            return;
        }
        for (contract, quantity, market_price) in rows {
            tracing::info!(
                symbol = %contract.display_symbol(),
                %quantity,
                %market_price,
                "Position"
            );
        }
    }

    async fn cancel(&self, args: &str) -> anyhow::Result<()> {
        let order_id: i64 = args.trim().parse().context("usage: cancel ORDER_ID")?;
        self.session.gateway().cancel_order(order_id).await?;
        tracing::info!(order_id, "Cancel requested");
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for SessionCommands {
    async fn run(&self, command: &Command) -> anyhow::Result<()> {
        let args = command.args.as_deref().unwrap_or_default();

        match command.name.as_str() {
            "add" => {
                if args.is_empty() {
                    bail!("usage: add SYMBOL");
                }
                for symbol in args.split_whitespace() {
                    self.session.add_quote(&clean_symbol(symbol)).await?;
                }
                Ok(())
            }
            "buy" => self.order(OrderSide::Buy, args, false).await,
            "sell" => self.order(OrderSide::Sell, args, false).await,
            "preview" => self.order(OrderSide::Buy, args, true).await,
            "spread" => self.spread(args).await,
            "bracket" => self.bracket(args).await,
            "orders" => {
                self.orders();
                Ok(())
            }
            "positions" => {
                self.positions((!args.is_empty()).then_some(args));
                Ok(())
            }
            "cancel" => self.cancel(args).await,
            "exit" | "quit" => {
                tracing::info!("Exit requested");
                self.session.request_exit();
                Ok(())
            }
            unknown => bail!("unknown command: {unknown}"),
        }
    }
}

fn clean_symbol(symbol: &str) -> String {
    symbol.trim_matches('"').to_uppercase()
}

fn parse_side(text: &str) -> anyhow::Result<OrderSide> {
    match text.to_lowercase().as_str() {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => bail!("expected buy or sell, got {other}"),
    }
}

fn parse_decimal(text: &str) -> anyhow::Result<Decimal> {
    text.parse()
        .with_context(|| format!("not a number: {text}"))
}
