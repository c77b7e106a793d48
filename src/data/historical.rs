//! Historical candle sources for backtesting
//!
//! Both sources implement [`Feeder`]: the subscription channel is filled with
//! the full dataset and then closed, which is how the candle feed knows a
//! backtest ingest is finished.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::data::Candle;
use crate::exchange::Feeder;
use crate::Result;

/// In-memory candle source, keyed by pair.
#[derive(Debug, Default)]
pub struct HistoricalFeed {
    timeframe: String,
    candles: HashMap<String, Vec<Candle>>,
}

impl HistoricalFeed {
    pub fn new(timeframe: impl Into<String>) -> Self {
        Self {
            timeframe: timeframe.into(),
            candles: HashMap::new(),
        }
    }

    /// Add candles for a pair. They are sorted by timestamp so replay order
    /// does not depend on input order.
    pub fn with_candles(mut self, pair: impl Into<String>, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        self.candles.insert(pair.into(), candles);
        self
    }

    fn pair_candles(&self, pair: &str, timeframe: &str) -> Vec<Candle> {
        if timeframe != self.timeframe {
            return Vec::new();
        }
        self.candles.get(pair).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Feeder for HistoricalFeed {
    async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let candles = self.pair_candles(pair, timeframe);
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn candles_subscription(
        &self,
        pair: &str,
        timeframe: &str,
    ) -> mpsc::UnboundedReceiver<Candle> {
        let (tx, rx) = mpsc::unbounded_channel();
        for candle in self.pair_candles(pair, timeframe) {
            if tx.send(candle).is_err() {
                break;
            }
        }
        // Dropping the sender closes the stream: historical data is finite.
        rx
    }
}

#[derive(Debug, Deserialize)]
struct CsvCandle {
    /// Bar open time, unix seconds
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// CSV-backed candle source. Each pair maps to one file with the header
/// `time,open,high,low,close,volume` and unix-second timestamps. Every row
/// is a closed bar, so all candles are emitted complete.
pub struct CsvFeed;

impl CsvFeed {
    /// Build a [`HistoricalFeed`] from per-pair CSV files.
    pub fn from_files<P: AsRef<Path>>(
        timeframe: &str,
        pairs: &[(&str, P)],
    ) -> Result<HistoricalFeed> {
        let mut feed = HistoricalFeed::new(timeframe);
        for (pair, path) in pairs {
            let file = std::fs::File::open(path.as_ref()).map_err(|err| {
                anyhow::anyhow!("open candle file {}: {err}", path.as_ref().display())
            })?;
            feed = feed.with_candles(*pair, Self::parse(pair, timeframe, file)?);
        }
        Ok(feed)
    }

    /// Parse one pair's candles from a CSV reader.
    pub fn parse<R: Read>(pair: &str, timeframe: &str, reader: R) -> Result<Vec<Candle>> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut candles = Vec::new();
        for record in csv_reader.deserialize() {
            let row: CsvCandle = record?;
            let timestamp = Utc
                .timestamp_opt(row.time, 0)
                .single()
                .ok_or_else(|| anyhow::anyhow!("invalid timestamp {} for {pair}", row.time))?;
            candles.push(Candle::new(
                pair, timeframe, row.open, row.high, row.low, row.close, row.volume, timestamp,
                true,
            ));
        }
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
time,open,high,low,close,volume
1609459200,100.0,105.0,99.0,104.0,1200.5
1609462800,104.0,106.0,103.0,105.5,900.0
";

    #[test]
    fn test_parse_csv_candles() {
        let candles = CsvFeed::parse("BTCUSDT", "1h", CSV.as_bytes()).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, 100.0);
        assert_eq!(candles[0].timestamp.timestamp(), 1_609_459_200);
        assert!(candles.iter().all(|c| c.complete));
        assert_eq!(candles[1].close, 105.5);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = CsvFeed::parse("BTCUSDT", "1h", "time,open\nnot,a number".as_bytes());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscription_emits_sorted_then_closes() {
        let candles = CsvFeed::parse("BTCUSDT", "1h", CSV.as_bytes()).unwrap();
        let reversed: Vec<Candle> = candles.into_iter().rev().collect();
        let feed = HistoricalFeed::new("1h").with_candles("BTCUSDT", reversed);

        let mut rx = feed.candles_subscription("BTCUSDT", "1h").await;
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.timestamp < second.timestamp);
        assert!(rx.recv().await.is_none(), "stream must close when exhausted");
    }

    #[tokio::test]
    async fn test_candles_by_limit_returns_most_recent() {
        let candles = CsvFeed::parse("BTCUSDT", "1h", CSV.as_bytes()).unwrap();
        let feed = HistoricalFeed::new("1h").with_candles("BTCUSDT", candles);

        let recent = feed.candles_by_limit("BTCUSDT", "1h", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].close, 105.5);
    }

    #[tokio::test]
    async fn test_from_files_reads_disk() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();

        let feed = CsvFeed::from_files("1h", &[("BTCUSDT", file.path())]).unwrap();
        let candles = feed.candles_by_limit("BTCUSDT", "1h", 10).await.unwrap();
        assert_eq!(candles.len(), 2);
    }
}
