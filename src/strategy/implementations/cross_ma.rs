//! Moving-average crossover strategy.

use crate::data::CandleSeries;
use crate::exchange::{Broker, OrderSide};
use crate::strategy::{ChartIndicator, IndicatorMetric, Strategy};
use crate::Result;

const MIN_QUOTE: f64 = 10.0;
const ENTRY_FRACTION: f64 = 0.3;

/// Buys a slice of the free quote balance when the fast SMA crosses above the
/// slow SMA and liquidates the asset position on the cross back under.
pub struct CrossMA {
    fast: usize,
    slow: usize,
}

impl CrossMA {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }

    fn sma(closes: &[f64], period: usize, offset: usize) -> Option<f64> {
        if closes.len() < period + offset {
            return None;
        }
        let end = closes.len() - offset;
        let window = &closes[end - period..end];
        Some(window.iter().sum::<f64>() / period as f64)
    }
}

impl Strategy for CrossMA {
    fn timeframe(&self) -> &str {
        "1h"
    }

    fn warmup_period(&self) -> usize {
        self.slow + 1
    }

    fn indicators(&self, df: &CandleSeries) -> Vec<ChartIndicator> {
        let closes = df.closes();
        let series = |period: usize| {
            (0..closes.len())
                .map(|i| Self::sma(&closes[..=i], period, 0).unwrap_or(f64::NAN))
                .collect::<Vec<_>>()
        };
        vec![ChartIndicator {
            group_name: "MA's".to_string(),
            overlay: true,
            metrics: vec![
                IndicatorMetric {
                    name: format!("SMA {}", self.fast),
                    color: "red".to_string(),
                    values: series(self.fast),
                },
                IndicatorMetric {
                    name: format!("SMA {}", self.slow),
                    color: "blue".to_string(),
                    values: series(self.slow),
                },
            ],
        }]
    }

    fn on_candle(&mut self, df: &CandleSeries, broker: &dyn Broker) -> Result<()> {
        let closes = df.closes();
        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) = (
            Self::sma(&closes, self.fast, 0),
            Self::sma(&closes, self.slow, 0),
            Self::sma(&closes, self.fast, 1),
            Self::sma(&closes, self.slow, 1),
        ) else {
            return Ok(());
        };

        let pair = match df.last() {
            Some(candle) => candle.pair.clone(),
            None => return Ok(()),
        };
        let (asset, quote) = broker.position(&pair)?;

        let crossed_over = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_under = fast_prev >= slow_prev && fast_now < slow_now;

        if crossed_over && quote >= MIN_QUOTE {
            broker.create_order_market_quote(OrderSide::Buy, &pair, quote * ENTRY_FRACTION)?;
        } else if crossed_under && asset > 0.0 {
            broker.create_order_market(OrderSide::Sell, &pair, asset)?;
        }
        Ok(())
    }
}
