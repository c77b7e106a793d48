//! OHLCV candle data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candle data
///
/// A candle is immutable once emitted. `complete = false` marks an
/// in-progress bar that is still forming; a later partial update for the same
/// timestamp is a new value, not a mutation of a shared object. Exactly one
/// `complete = true` candle is eventually emitted per (pair, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Pair (e.g. "BTCUSDT")
    pub pair: String,
    /// Timeframe (e.g. "5m", "1h", "1d")
    pub timeframe: String,
    /// Opening price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Volume
    pub volume: f64,
    /// Bar open time
    pub timestamp: DateTime<Utc>,
    /// Whether the bar's time window has closed
    pub complete: bool,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pair: impl Into<String>,
        timeframe: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        timestamp: DateTime<Utc>,
        complete: bool,
    ) -> Self {
        Self {
            pair: pair.into(),
            timeframe: timeframe.into(),
            open,
            high,
            low,
            close,
            volume,
            timestamp,
            complete,
        }
    }

}

/// Per-pair rolling window of candles handed to strategies.
///
/// Complete candles append; a partial update for the timestamp of the last
/// entry replaces it, so the series always reflects the latest known state of
/// the forming bar without ever holding two entries for one timestamp.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    /// Apply a candle event: replace the last entry when the timestamp
    /// matches, append otherwise. Idempotent for repeated identical events.
    pub fn apply(&mut self, candle: Candle) {
        if let Some(last) = self.candles.last_mut() {
            if last.timestamp == candle.timestamp {
                *last = candle;
                return;
            }
        }
        self.candles.push(candle);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Get close prices as vector
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Get high prices as vector
    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    /// Get low prices as vector
    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    /// Get volumes as vector
    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }
}

impl From<Vec<Candle>> for CandleSeries {
    fn from(candles: Vec<Candle>) -> Self {
        Self::from_vec(candles)
    }
}
