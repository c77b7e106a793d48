//! Per-pair strategy controller

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::data::{Candle, CandleSeries};
use crate::exchange::Broker;
use crate::strategy::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Warming,
    Active,
}

/// Wraps a strategy for one pair: maintains the rolling dataframe, enforces
/// warmup, and dispatches partial/complete candle events.
///
/// A faulty strategy iteration (error or panic in the decision hook) is
/// isolated: it is logged and the next candle is still processed.
pub struct StrategyController {
    pair: String,
    strategy: Box<dyn Strategy>,
    broker: Arc<dyn Broker>,
    dataframe: CandleSeries,
    state: State,
    started: bool,
    last_decision: Option<DateTime<Utc>>,
}

impl StrategyController {
    pub fn new(pair: impl Into<String>, strategy: Box<dyn Strategy>, broker: Arc<dyn Broker>) -> Self {
        Self {
            pair: pair.into(),
            strategy,
            broker,
            dataframe: CandleSeries::new(),
            state: State::Warming,
            started: false,
            last_decision: None,
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn dataframe(&self) -> &CandleSeries {
        &self.dataframe
    }

    /// Allow decision dispatch once warmup is satisfied.
    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    fn refresh_state(&mut self) {
        if self.state == State::Warming
            && self.started
            && self.dataframe.len() >= self.strategy.warmup_period()
        {
            self.state = State::Active;
            info!(pair = %self.pair, candles = self.dataframe.len(), "strategy active");
        }
    }

    /// Handle any candle event: update the dataframe and run the
    /// partial-update hook.
    pub fn on_partial_candle(&mut self, candle: &Candle) {
        self.dataframe.apply(candle.clone());
        self.refresh_state();
        self.strategy.on_partial_candle(&self.dataframe);
    }

    /// Handle a complete candle: run the decision hook when Active. Each
    /// (pair, timestamp) is decided at most once.
    pub fn on_candle(&mut self, candle: &Candle) {
        self.dataframe.apply(candle.clone());
        self.refresh_state();
        if self.state != State::Active {
            return;
        }
        if self.last_decision == Some(candle.timestamp) {
            return;
        }
        self.last_decision = Some(candle.timestamp);

        let dataframe = &self.dataframe;
        let broker = self.broker.clone();
        let strategy = &mut self.strategy;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            strategy.on_candle(dataframe, broker.as_ref())
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(pair = %self.pair, "strategy decision failed: {err:#}");
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(pair = %self.pair, "strategy decision panicked: {message}");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
