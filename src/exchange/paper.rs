//! Simulated matching engine ("paper wallet")
//!
//! Stands in for a real exchange during backtesting and dry-run live
//! trading. Market orders fill synchronously against the last observed
//! candle close for the pair, adjusted by configured fee and slippage;
//! there is no pending state. Balances, equity history and maximum drawdown
//! are tracked per run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::data::Candle;
use crate::error::OrderError;
use crate::exchange::{split_asset_quote, Broker, Feeder};
use crate::exchange::{Order, OrderKind, OrderSide, OrderStatus};
use crate::Result;

#[derive(Debug, Default)]
struct WalletState {
    /// Free balance per asset symbol (the quote currency included).
    assets: HashMap<String, f64>,
    /// Latest candle per pair, used for fills and equity valuation.
    last_candle: HashMap<String, Candle>,
    /// Portfolio value at the first equity sample.
    start_value: Option<f64>,
    peak_equity: f64,
    /// Worst peak-to-trough decline, stored as a non-positive fraction.
    max_drawdown: f64,
    equity_history: Vec<(chrono::DateTime<Utc>, f64)>,
    volume: f64,
}

impl WalletState {
    fn balance(&self, symbol: &str) -> f64 {
        self.assets.get(symbol).copied().unwrap_or(0.0)
    }

    /// Portfolio value in the reference quote currency. Holdings without an
    /// observed price yet contribute nothing.
    fn equity(&self, base_quote: &str) -> f64 {
        let mut total = self.balance(base_quote);
        for (symbol, quantity) in &self.assets {
            if symbol == base_quote || *quantity == 0.0 {
                continue;
            }
            let pair = format!("{symbol}{base_quote}");
            if let Some(candle) = self.last_candle.get(&pair) {
                total += quantity * candle.close;
            }
        }
        total
    }
}

/// Simulated exchange wallet.
///
/// Implements [`Broker`] for order execution and forwards [`Feeder`] to the
/// wrapped data source, so it can be handed to the engine as the exchange.
pub struct PaperWallet {
    base_quote: String,
    feeder: Option<Arc<dyn Feeder>>,
    maker_fee: f64,
    taker_fee: f64,
    slippage: f64,
    state: Mutex<WalletState>,
}

impl PaperWallet {
    /// Create a wallet with `base_quote` as the reference quote currency.
    pub fn new(base_quote: impl Into<String>) -> Self {
        Self {
            base_quote: base_quote.into(),
            feeder: None,
            maker_fee: 0.0,
            taker_fee: 0.0,
            slippage: 0.0,
            state: Mutex::new(WalletState::default()),
        }
    }

    /// Seed an asset balance.
    pub fn with_asset(self, symbol: impl Into<String>, amount: f64) -> Self {
        self.lock().assets.insert(symbol.into(), amount);
        self
    }

    /// Set maker/taker fee fractions. Market orders pay the taker fee.
    pub fn with_fee(mut self, maker: f64, taker: f64) -> Self {
        self.maker_fee = maker;
        self.taker_fee = taker;
        self
    }

    /// Set the slippage fraction applied against the order side.
    pub fn with_slippage(mut self, slippage: f64) -> Self {
        self.slippage = slippage;
        self
    }

    /// Attach the market-data source the wallet forwards [`Feeder`] calls to.
    pub fn with_data_feed(mut self, feeder: Arc<dyn Feeder>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the latest-price cache and, on complete candles, resample
    /// equity and the running max drawdown.
    pub fn on_candle(&self, candle: &Candle) {
        let mut state = self.lock();
        state
            .last_candle
            .insert(candle.pair.clone(), candle.clone());

        if !candle.complete {
            return;
        }

        let equity = state.equity(&self.base_quote);
        if state.start_value.is_none() {
            state.start_value = Some(equity);
            state.peak_equity = equity;
        }
        if equity > state.peak_equity {
            state.peak_equity = equity;
        } else if state.peak_equity > 0.0 {
            let drawdown = (equity - state.peak_equity) / state.peak_equity;
            if drawdown < state.max_drawdown {
                state.max_drawdown = drawdown;
            }
        }
        state.equity_history.push((candle.timestamp, equity));
    }

    /// Starting/ending portfolio value, drawdown and volume for the run.
    pub fn summary(&self) -> WalletSummary {
        let state = self.lock();
        let final_value = state.equity(&self.base_quote);
        let mut balances: Vec<(String, f64)> = state
            .assets
            .iter()
            .map(|(symbol, amount)| (symbol.clone(), *amount))
            .collect();
        balances.sort_by(|a, b| a.0.cmp(&b.0));

        WalletSummary {
            quote: self.base_quote.clone(),
            balances,
            start_value: state.start_value.unwrap_or(final_value),
            final_value,
            max_drawdown: state.max_drawdown,
            volume: state.volume,
        }
    }

    /// Equity samples collected so far, oldest first.
    pub fn equity_history(&self) -> Vec<(chrono::DateTime<Utc>, f64)> {
        self.lock().equity_history.clone()
    }

    fn validate(pair: &str, quantity: f64) -> Result<(), OrderError> {
        if split_asset_quote(pair).is_none() {
            return Err(OrderError::InvalidPair(pair.to_string()));
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(OrderError::InvalidQuantity(quantity));
        }
        Ok(())
    }

    /// Fill price for a side: last close moved against the taker by the
    /// slippage fraction.
    fn fill_price(&self, side: OrderSide, close: f64) -> f64 {
        match side {
            OrderSide::Buy => close * (1.0 + self.slippage),
            OrderSide::Sell => close * (1.0 - self.slippage),
        }
    }

    /// Execute a market fill: debit and credit under the wallet lock, or
    /// reject with zero balance mutation.
    fn execute(
        &self,
        side: OrderSide,
        pair: &str,
        kind: OrderKind,
        quantity_hint: Option<f64>,
        quote_amount: Option<f64>,
    ) -> Result<Order, OrderError> {
        let (asset, quote) =
            split_asset_quote(pair).ok_or_else(|| OrderError::InvalidPair(pair.to_string()))?;

        let mut state = self.lock();
        let candle = state
            .last_candle
            .get(pair)
            .cloned()
            .ok_or_else(|| OrderError::NoPriceData(pair.to_string()))?;
        let price = self.fill_price(side, candle.close);

        let (quantity, quote_delta) = match (side, quote_amount) {
            // Sized in base asset: fee rides on top of (buy) or comes out of
            // (sell) the quote leg.
            (OrderSide::Buy, None) => {
                let quantity = quantity_hint.unwrap_or(0.0);
                (quantity, -(quantity * price * (1.0 + self.taker_fee)))
            }
            (OrderSide::Sell, None) => {
                let quantity = quantity_hint.unwrap_or(0.0);
                (quantity, quantity * price * (1.0 - self.taker_fee))
            }
            // Sized in quote currency: a buy spends exactly the given amount.
            (OrderSide::Buy, Some(amount)) => {
                (amount / (price * (1.0 + self.taker_fee)), -amount)
            }
            (OrderSide::Sell, Some(amount)) => {
                let quantity = amount / price;
                (quantity, quantity * price * (1.0 - self.taker_fee))
            }
        };
        Self::validate(pair, quantity)?;

        match side {
            OrderSide::Buy => {
                let needed = -quote_delta;
                let available = state.balance(quote);
                if available < needed {
                    return Err(OrderError::InsufficientFunds {
                        pair: pair.to_string(),
                        needed,
                        available,
                    });
                }
                *state.assets.entry(quote.to_string()).or_default() += quote_delta;
                *state.assets.entry(asset.to_string()).or_default() += quantity;
            }
            OrderSide::Sell => {
                let available = state.balance(asset);
                if available < quantity {
                    return Err(OrderError::InsufficientFunds {
                        pair: pair.to_string(),
                        needed: quantity,
                        available,
                    });
                }
                *state.assets.entry(asset.to_string()).or_default() -= quantity;
                *state.assets.entry(quote.to_string()).or_default() += quote_delta;
            }
        }
        state.volume += quantity * price;

        debug!(pair, %side, quantity, price, "paper wallet fill");

        // Timestamps come from market data, not the wall clock, so replaying
        // the same input reproduces the same orders.
        Ok(Order {
            id: 0,
            pair: pair.to_string(),
            side,
            kind,
            quantity,
            status: OrderStatus::Filled,
            created_at: candle.timestamp,
            filled_at: Some(candle.timestamp),
            filled_price: Some(price),
        })
    }
}

impl Broker for PaperWallet {
    fn create_order_market(
        &self,
        side: OrderSide,
        pair: &str,
        quantity: f64,
    ) -> Result<Order, OrderError> {
        Self::validate(pair, quantity)?;
        self.execute(side, pair, OrderKind::Market, Some(quantity), None)
    }

    fn create_order_market_quote(
        &self,
        side: OrderSide,
        pair: &str,
        quote_amount: f64,
    ) -> Result<Order, OrderError> {
        Self::validate(pair, quote_amount)?;
        self.execute(side, pair, OrderKind::MarketQuote, None, Some(quote_amount))
    }

    fn position(&self, pair: &str) -> Result<(f64, f64), OrderError> {
        let (asset, quote) =
            split_asset_quote(pair).ok_or_else(|| OrderError::InvalidPair(pair.to_string()))?;
        let state = self.lock();
        Ok((state.balance(asset), state.balance(quote)))
    }
}

#[async_trait]
impl Feeder for PaperWallet {
    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        match &self.feeder {
            Some(feeder) => feeder.candles_by_limit(pair, timeframe, limit).await,
            None => anyhow::bail!("paper wallet has no data feed attached"),
        }
    }

    async fn candles_subscription(
        &self,
        pair: &str,
        timeframe: &str,
    ) -> mpsc::UnboundedReceiver<Candle> {
        match &self.feeder {
            Some(feeder) => feeder.candles_subscription(pair, timeframe).await,
            None => mpsc::unbounded_channel().1,
        }
    }
}

/// Structured summary figures. `Display` renders the legacy labeled lines
/// (`START PORTFOLIO`, `FINAL PORTFOLIO`, `MAX DRAWDOWN`) that external
/// analysis tooling parses by label.
#[derive(Debug, Clone)]
pub struct WalletSummary {
    pub quote: String,
    /// (symbol, amount) balances, sorted by symbol.
    pub balances: Vec<(String, f64)>,
    pub start_value: f64,
    pub final_value: f64,
    /// Non-positive fraction, e.g. -0.12 for a 12% drawdown.
    pub max_drawdown: f64,
    pub volume: f64,
}

impl WalletSummary {
    pub fn profit(&self) -> f64 {
        self.final_value - self.start_value
    }
}

impl std::fmt::Display for WalletSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "--------------")?;
        writeln!(f, "WALLET SUMMARY")?;
        writeln!(f, "--------------")?;
        for (symbol, amount) in &self.balances {
            writeln!(f, "{amount:.6} {symbol}")?;
        }
        writeln!(f, "--------------")?;
        writeln!(f, "TRADING VOLUME = {:.2} {}", self.volume, self.quote)?;
        writeln!(f, "START PORTFOLIO = {:.2} {}", self.start_value, self.quote)?;
        writeln!(f, "FINAL PORTFOLIO = {:.2} {}", self.final_value, self.quote)?;
        let profit_pct = if self.start_value > 0.0 {
            self.profit() / self.start_value * 100.0
        } else {
            0.0
        };
        writeln!(
            f,
            "GROSS PROFIT = {:.2} {} ({:.2}%)",
            self.profit(),
            self.quote,
            profit_pct
        )?;
        // The minus sign is explicit: drawdown consumers parse "MAX DRAWDOWN
        // = -<value>" even when it is zero.
        writeln!(f, "MAX DRAWDOWN = -{:.2} %", self.max_drawdown.abs() * 100.0)
    }
}
