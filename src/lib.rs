//! Quantbot: an event-driven trading engine
//!
//! The engine drives a pluggable trading strategy against either live market
//! data or a historical replay, executing orders through an exchange
//! abstraction and tracking the resulting performance. Identical strategy
//! code runs unmodified in both modes:
//!
//! - candle events from every pair flow through a chronological scheduler,
//!   so strategies never observe out-of-order data regardless of network
//!   jitter or file-read speed differences between pairs;
//! - order submission goes through a single order controller that persists
//!   every status transition and publishes lifecycle events;
//! - a simulated matching engine ([`exchange::PaperWallet`]) stands in for a
//!   real exchange during backtesting and dry-run trading.
//!
//! # Example
//!
//! ```no_run
//! use quantbot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::new(vec!["BTCUSDT".into(), "ETHUSDT".into()]);
//!     let feed = CsvFeed::from_files("1h", &[
//!         ("BTCUSDT", "testdata/BTCUSDT-1h.csv"),
//!         ("ETHUSDT", "testdata/ETHUSDT-1h.csv"),
//!     ])?;
//!     let wallet = Arc::new(
//!         PaperWallet::new("USDT")
//!             .with_asset("USDT", 10_000.0)
//!             .with_fee(0.001, 0.001)
//!             .with_data_feed(Arc::new(feed)),
//!     );
//!     let bot = Bot::builder(settings, wallet.clone(), || {
//!         Box::new(CrossMA::new(8, 21)) as Box<dyn Strategy>
//!     })
//!     .with_backtest(wallet)
//!     .build()?;
//!     bot.run().await?;
//!     println!("{}", bot.summary());
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod data;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod logging;
pub mod notification;
pub mod order;
pub mod storage;
pub mod strategy;

// Re-export commonly used types
pub mod prelude {
    pub use crate::bot::{Bot, BotBuilder, EngineSummary};
    pub use crate::config::Settings;
    pub use crate::data::{Candle, CandleScheduler, CandleSeries, CsvFeed, HistoricalFeed};
    pub use crate::error::{EngineError, OrderError};
    pub use crate::exchange::{Broker, Exchange, Feeder, PaperWallet, WalletSummary};
    pub use crate::exchange::{Order, OrderKind, OrderSide, OrderStatus};
    pub use crate::notification::{LogNotifier, Notifier};
    pub use crate::order::{OrderFeed, PairResult};
    pub use crate::storage::{JsonFileStorage, MemoryStorage, Storage};
    pub use crate::strategy::implementations::CrossMA;
    pub use crate::strategy::{Strategy, StrategyController};

    pub use anyhow::{Context, Result};
}

/// Result type alias
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
