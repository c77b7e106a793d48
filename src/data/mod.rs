//! Market data: candles, feeds, and the chronological scheduler

mod candle;
mod feed;
mod historical;
mod scheduler;

pub use candle::{Candle, CandleSeries};
pub use feed::DataFeedSubscription;
pub use historical::{CsvFeed, HistoricalFeed};
pub use scheduler::CandleScheduler;
