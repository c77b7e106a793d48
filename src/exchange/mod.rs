//! Exchange abstraction
//!
//! The engine core talks to the outside world through two collaborator
//! contracts: [`Feeder`] for market data and [`Broker`] for order execution
//! and position queries. A real exchange client implements both; so does the
//! simulated [`PaperWallet`], which is what lets identical strategy code run
//! in backtests, dry runs, and production.

mod order;
mod paper;

pub use order::{Order, OrderKind, OrderSide, OrderStatus};
pub use paper::{PaperWallet, WalletSummary};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::data::Candle;
use crate::error::OrderError;
use crate::Result;

/// Market-data source.
#[async_trait]
pub trait Feeder: Send + Sync {
    /// Fetch the most recent `limit` candles for a pair. Used for the warmup
    /// preload in non-backtest mode.
    async fn candles_by_limit(&self, pair: &str, timeframe: &str, limit: usize)
        -> Result<Vec<Candle>>;

    /// Open a candle stream for a pair. For historical sources the channel
    /// closes once the data is exhausted; live sources keep it open.
    async fn candles_subscription(
        &self,
        pair: &str,
        timeframe: &str,
    ) -> mpsc::UnboundedReceiver<Candle>;
}

/// Order execution and position queries.
///
/// Strategies receive a `&dyn Broker` (in practice the order controller,
/// which wraps the exchange with persistence and event publication).
pub trait Broker: Send + Sync {
    /// Submit a market order for `quantity` units of the base asset.
    fn create_order_market(
        &self,
        side: OrderSide,
        pair: &str,
        quantity: f64,
    ) -> Result<Order, OrderError>;

    /// Submit a market order sized in quote currency.
    fn create_order_market_quote(
        &self,
        side: OrderSide,
        pair: &str,
        quote_amount: f64,
    ) -> Result<Order, OrderError>;

    /// Current `(asset, quote)` free balances for a pair.
    fn position(&self, pair: &str) -> Result<(f64, f64), OrderError>;
}

/// A full exchange: market data plus execution.
pub trait Exchange: Feeder + Broker {}

impl<T: Feeder + Broker> Exchange for T {}

/// Quote currencies recognized by [`split_asset_quote`], longest first so
/// that e.g. "USDT" wins over "USD".
const QUOTE_CURRENCIES: &[&str] = &[
    "USDT", "USDC", "BUSD", "TUSD", "BRL", "EUR", "USD", "BTC", "ETH", "BNB",
];

/// Split a pair like "BTCUSDT" into ("BTC", "USDT"). Returns `None` when no
/// known quote currency suffix matches or the asset part would be empty.
pub fn split_asset_quote(pair: &str) -> Option<(&str, &str)> {
    for quote in QUOTE_CURRENCIES {
        if let Some(asset) = pair.strip_suffix(quote) {
            if !asset.is_empty() {
                return Some((asset, quote));
            }
        }
    }
    None
}
