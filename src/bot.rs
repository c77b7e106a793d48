//! Engine orchestrator

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Table};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::Settings;
use crate::data::{Candle, CandleScheduler, DataFeedSubscription};
use crate::error::EngineError;
use crate::exchange::{Broker, Exchange, Feeder, PaperWallet, WalletSummary};
use crate::feed::Handler;
use crate::notification::Notifier;
use crate::order::{Controller, OrderFeed, PairResult};
use crate::storage::{MemoryStorage, Storage};
use crate::strategy::{Strategy, StrategyController};
use crate::Result;

type StrategyFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Builder for [`Bot`]. Collects the exchange, strategy and optional
/// collaborators before wiring the engine together.
pub struct BotBuilder {
    settings: Settings,
    feeder: Arc<dyn Feeder>,
    broker: Arc<dyn Broker>,
    strategy_factory: StrategyFactory,
    storage: Option<Arc<dyn Storage>>,
    notifier: Option<Arc<dyn Notifier>>,
    paper_wallet: Option<Arc<PaperWallet>>,
    backtest: bool,
    candle_subscriptions: Vec<(String, Handler<Candle>)>,
    order_subscriptions: Vec<(String, Handler<crate::exchange::Order>)>,
}

impl BotBuilder {
    pub fn new<E, F>(settings: Settings, exchange: Arc<E>, strategy_factory: F) -> Self
    where
        E: Exchange + 'static,
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        Self {
            settings,
            feeder: exchange.clone(),
            broker: exchange,
            strategy_factory: Box::new(strategy_factory),
            storage: None,
            notifier: None,
            paper_wallet: None,
            backtest: false,
            candle_subscriptions: Vec::new(),
            order_subscriptions: Vec::new(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Track equity and drawdown against a wallet while trading live through
    /// the configured exchange.
    pub fn with_paper_wallet(mut self, wallet: Arc<PaperWallet>) -> Self {
        self.paper_wallet = Some(wallet);
        self
    }

    /// Run in backtest mode: candles are drained from historical data as
    /// fast as possible, warmup preload is skipped, and the given wallet
    /// simulates fills.
    pub fn with_backtest(mut self, wallet: Arc<PaperWallet>) -> Self {
        self.backtest = true;
        self.paper_wallet = Some(wallet);
        self
    }

    /// Attach an external observer to the candle stream of one pair.
    pub fn with_candle_subscription(
        mut self,
        pair: impl Into<String>,
        handler: Handler<Candle>,
    ) -> Self {
        self.candle_subscriptions.push((pair.into(), handler));
        self
    }

    /// Attach an external observer to the order lifecycle feed of one pair.
    pub fn with_order_subscription(
        mut self,
        pair: impl Into<String>,
        handler: Handler<crate::exchange::Order>,
    ) -> Self {
        self.order_subscriptions.push((pair.into(), handler));
        self
    }

    pub fn build(self) -> Result<Bot> {
        self.settings.validate()?;

        // One probe instance fixes the timeframe and warmup for the run;
        // every pair then gets its own instance from the factory.
        let probe = (self.strategy_factory)();
        let timeframe = probe.timeframe().to_string();
        let warmup = probe.warmup_period();

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let data_feed = Arc::new(DataFeedSubscription::new(self.feeder.clone()));
        let order_feed = Arc::new(OrderFeed::new());
        let order_controller = Arc::new(Controller::new(
            self.broker.clone(),
            storage,
            order_feed.clone(),
        ));
        if let Some(notifier) = self.notifier {
            order_controller.set_notifier(notifier);
        }

        for (pair, handler) in self.candle_subscriptions {
            data_feed.subscribe(&pair, &timeframe, handler, false);
        }
        for (pair, handler) in self.order_subscriptions {
            order_feed.subscribe(&pair, handler, false);
        }

        Ok(Bot {
            settings: self.settings,
            feeder: self.feeder,
            data_feed,
            scheduler: Arc::new(CandleScheduler::new()),
            order_feed,
            order_controller,
            paper_wallet: self.paper_wallet,
            backtest: self.backtest,
            strategy_factory: self.strategy_factory,
            timeframe,
            warmup,
            controllers: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
        })
    }
}

/// The engine: owns the data feed, the chronological scheduler, the order
/// controller and one strategy controller per pair, and drives them from a
/// single candle loop so every component observes events in the same order.
pub struct Bot {
    settings: Settings,
    feeder: Arc<dyn Feeder>,
    data_feed: Arc<DataFeedSubscription>,
    scheduler: Arc<CandleScheduler>,
    order_feed: Arc<OrderFeed>,
    order_controller: Arc<Controller>,
    paper_wallet: Option<Arc<PaperWallet>>,
    backtest: bool,
    strategy_factory: StrategyFactory,
    timeframe: String,
    warmup: usize,
    controllers: Mutex<HashMap<String, StrategyController>>,
    shutdown: Notify,
}

impl Bot {
    pub fn builder<E, F>(settings: Settings, exchange: Arc<E>, strategy_factory: F) -> BotBuilder
    where
        E: Exchange + 'static,
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        BotBuilder::new(settings, exchange, strategy_factory)
    }

    pub fn order_controller(&self) -> Arc<Controller> {
        self.order_controller.clone()
    }

    /// Request a live run to stop. The loop finishes the candle in flight,
    /// drains whatever the scheduler already holds, then returns.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the engine until the data is exhausted (backtest) or
    /// [`shutdown`](Self::shutdown) is called (live).
    pub async fn run(&self) -> Result<()> {
        self.order_feed.start();
        self.order_controller.start();

        for pair in self.settings.pairs.clone() {
            let mut controller = StrategyController::new(
                &pair,
                (self.strategy_factory)(),
                self.order_controller.clone(),
            );

            if !self.backtest {
                self.preload(&pair, &mut controller).await?;
            }

            let scheduler = self.scheduler.clone();
            self.data_feed.subscribe(
                &pair,
                &self.timeframe,
                Box::new(move |candle| {
                    scheduler.push(candle);
                    Ok(())
                }),
                false,
            );

            controller.start();
            self.controllers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(pair, controller);
        }

        self.data_feed.start(self.backtest).await;

        if self.backtest {
            self.run_backtest();
        } else {
            self.run_live().await;
        }

        self.order_feed.close();
        self.order_feed.join().await;
        self.order_controller.stop();
        Ok(())
    }

    /// Warm a strategy controller with recent history before live candles
    /// arrive, so it is ready to trade on the first complete candle. The
    /// scheduler subscription is registered afterwards, so the preloaded
    /// candles are never replayed through the main loop.
    async fn preload(&self, pair: &str, controller: &mut StrategyController) -> Result<()> {
        let candles = self
            .feeder
            .candles_by_limit(pair, &self.timeframe, self.warmup)
            .await
            .map_err(|source| EngineError::Preload {
                pair: pair.to_string(),
                source,
            })?;
        for candle in &candles {
            if let Some(wallet) = &self.paper_wallet {
                wallet.on_candle(candle);
            }
            self.order_controller.on_candle(candle);
            controller.on_partial_candle(candle);
            controller.on_candle(candle);
        }
        self.data_feed.preload(pair, &self.timeframe, &candles);
        Ok(())
    }

    fn run_backtest(&self) {
        let total = self.scheduler.len() as u64;
        info!(candles = total, "starting backtest");
        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} candles ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        while let Some(candle) = self.scheduler.pop() {
            self.process_candle(candle);
            progress.inc(1);
        }
        progress.finish_and_clear();
        info!("backtest finished");
    }

    async fn run_live(&self) {
        info!(pairs = ?self.settings.pairs, "starting live candle loop");
        loop {
            tokio::select! {
                candle = self.scheduler.pop_wait() => {
                    self.process_candle(candle);
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown requested, draining scheduler");
                    self.data_feed.stop();
                    // Dispatchers may still be flushing already published
                    // candles into the scheduler; wait for them so the final
                    // drain sees everything.
                    self.data_feed.join().await;
                    while let Some(candle) = self.scheduler.pop() {
                        self.process_candle(candle);
                    }
                    break;
                }
            }
        }
    }

    fn process_candle(&self, candle: Candle) {
        if let Some(wallet) = &self.paper_wallet {
            wallet.on_candle(&candle);
        }
        let mut controllers = self
            .controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(controller) = controllers.get_mut(&candle.pair) else {
            warn!(pair = %candle.pair, "candle for unknown pair dropped");
            return;
        };
        controller.on_partial_candle(&candle);
        if candle.complete {
            self.order_controller.on_candle(&candle);
            controller.on_candle(&candle);
        }
    }

    /// Per-pair trade results plus, when a wallet is attached, the portfolio
    /// summary. Render with [`Display`](std::fmt::Display) for the classic
    /// results table.
    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            results: self.order_controller.results(),
            wallet: self.paper_wallet.as_ref().map(|w| w.summary()),
        }
    }
}

/// Aggregated run results.
pub struct EngineSummary {
    pub results: Vec<PairResult>,
    pub wallet: Option<WalletSummary>,
}

impl EngineSummary {
    pub fn total_profit(&self) -> f64 {
        self.results.iter().map(|r| r.profit()).sum()
    }

    pub fn total_volume(&self) -> f64 {
        self.results.iter().map(|r| r.volume).sum()
    }
}

impl std::fmt::Display for EngineSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            "Pair", "Trades", "Win", "Loss", "% Win", "Payoff", "SQN", "Profit", "Volume",
        ]);

        let mut total_trades = 0usize;
        let mut total_wins = 0usize;
        let mut total_losses = 0usize;
        for result in &self.results {
            let wins = result.wins().len();
            let losses = result.losses().len();
            total_trades += result.trades().len();
            total_wins += wins;
            total_losses += losses;
            table.add_row(vec![
                Cell::new(&result.pair),
                Cell::new(result.trades().len()).set_alignment(CellAlignment::Right),
                Cell::new(wins).set_alignment(CellAlignment::Right),
                Cell::new(losses).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1} %", result.win_rate() * 100.0))
                    .set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3}", result.payoff())).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", result.sqn())).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", result.profit())).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", result.volume)).set_alignment(CellAlignment::Right),
            ]);
        }
        let total_win_rate = if total_trades > 0 {
            total_wins as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };
        table.add_row(vec![
            Cell::new("TOTAL"),
            Cell::new(total_trades).set_alignment(CellAlignment::Right),
            Cell::new(total_wins).set_alignment(CellAlignment::Right),
            Cell::new(total_losses).set_alignment(CellAlignment::Right),
            Cell::new(format!("{total_win_rate:.1} %")).set_alignment(CellAlignment::Right),
            Cell::new("-").set_alignment(CellAlignment::Right),
            Cell::new("-").set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", self.total_profit())).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", self.total_volume())).set_alignment(CellAlignment::Right),
        ]);
        writeln!(f, "{table}")?;

        if let Some(wallet) = &self.wallet {
            writeln!(f, "{wallet}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::PairResult;

    fn result(pair: &str, trades: &[f64], volume: f64) -> PairResult {
        let mut r = PairResult::new(pair);
        for t in trades {
            r.add_trade(*t);
        }
        r.add_volume(volume);
        r
    }

    #[test]
    fn test_summary_totals() {
        let summary = EngineSummary {
            results: vec![
                result("BTCUSDT", &[10.0, -5.0], 1_000.0),
                result("ETHUSDT", &[20.0], 500.0),
            ],
            wallet: None,
        };
        assert!((summary.total_profit() - 25.0).abs() < 1e-9);
        assert!((summary.total_volume() - 1_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_display_has_total_row() {
        let summary = EngineSummary {
            results: vec![result("BTCUSDT", &[10.0, -5.0], 1_000.0)],
            wallet: None,
        };
        let rendered = summary.to_string();
        assert!(rendered.contains("BTCUSDT"));
        assert!(rendered.contains("TOTAL"));
        assert!(rendered.contains("50.0 %"));
    }
}
