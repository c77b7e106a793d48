//! Per-pair trading results ledger

use serde::{Deserialize, Serialize};

/// Closed-trade ledger for one pair. Mutated only by the order controller
/// when fills realize P&L.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairResult {
    pub pair: String,
    /// Realized P&L per closed trade, chronological.
    trades: Vec<f64>,
    /// Cumulative traded notional in quote currency, both sides.
    pub volume: f64,
}

impl PairResult {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            trades: Vec::new(),
            volume: 0.0,
        }
    }

    pub fn add_trade(&mut self, pnl: f64) {
        self.trades.push(pnl);
    }

    pub fn add_volume(&mut self, value: f64) {
        self.volume += value;
    }

    pub fn trades(&self) -> &[f64] {
        &self.trades
    }

    /// Winning trades (non-negative P&L).
    pub fn wins(&self) -> Vec<f64> {
        self.trades.iter().copied().filter(|t| *t >= 0.0).collect()
    }

    /// Losing trades (negative P&L).
    pub fn losses(&self) -> Vec<f64> {
        self.trades.iter().copied().filter(|t| *t < 0.0).collect()
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades.is_empty() {
            return 0.0;
        }
        self.wins().len() as f64 / self.trades.len() as f64
    }

    /// Sum of realized P&L.
    pub fn profit(&self) -> f64 {
        self.trades.iter().sum()
    }

    /// Ratio of the average winning trade to the average losing trade.
    pub fn payoff(&self) -> f64 {
        let wins = self.wins();
        let losses = self.losses();
        if wins.is_empty() || losses.is_empty() {
            return 0.0;
        }
        let avg_win = wins.iter().sum::<f64>() / wins.len() as f64;
        let avg_loss = losses.iter().sum::<f64>() / losses.len() as f64;
        avg_win / avg_loss.abs()
    }

    /// System Quality Number: sqrt(n) * mean(P&L) / stddev(P&L).
    pub fn sqn(&self) -> f64 {
        let n = self.trades.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.profit() / n as f64;
        let variance =
            self.trades.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return 0.0;
        }
        (n as f64).sqrt() * mean / std_dev
    }
}
