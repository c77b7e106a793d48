//! Strategy abstraction

mod controller;
pub mod implementations;

pub use controller::StrategyController;

use crate::data::CandleSeries;
use crate::exchange::Broker;
use crate::Result;

/// Chart metadata a strategy exposes for visualization. The engine never
/// interprets it; external charting observers do.
#[derive(Debug, Clone)]
pub struct ChartIndicator {
    pub group_name: String,
    /// Whether the metrics overlay the price chart or get their own panel.
    pub overlay: bool,
    pub metrics: Vec<IndicatorMetric>,
}

#[derive(Debug, Clone)]
pub struct IndicatorMetric {
    pub name: String,
    pub color: String,
    pub values: Vec<f64>,
}

/// A user-pluggable trading strategy.
///
/// Concrete strategies are selected by configuration and run behind this
/// trait; identical strategy code runs in backtest and live mode because the
/// engine feeds both from the same chronological stream.
pub trait Strategy: Send {
    /// Candle timeframe the strategy trades on (e.g. "5m", "1h").
    fn timeframe(&self) -> &str;

    /// Number of historical candles required before decisions are valid.
    fn warmup_period(&self) -> usize;

    /// Visualization metadata. Optional; the default exposes nothing.
    fn indicators(&self, _df: &CandleSeries) -> Vec<ChartIndicator> {
        Vec::new()
    }

    /// Decision hook, called once per complete candle after warmup. Orders
    /// go through the broker; a returned error is logged and the next candle
    /// is still processed.
    fn on_candle(&mut self, df: &CandleSeries, broker: &dyn Broker) -> Result<()>;

    /// Partial-update hook, called for every candle event (partial and
    /// complete) once warmup data exists. For indicator maintenance and live
    /// display; most strategies leave it empty.
    fn on_partial_candle(&mut self, _df: &CandleSeries) {}
}
