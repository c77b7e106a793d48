//! End-to-end backtest tests for quantbot

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use quantbot::config::Settings;
use quantbot::data::{Candle, CandleSeries, HistoricalFeed};
use quantbot::exchange::{Broker, Order, OrderSide, OrderStatus, PaperWallet};
use quantbot::prelude::Bot;
use quantbot::storage::{MemoryStorage, Storage};
use quantbot::strategy::Strategy;
use quantbot::Result;

const HOUR: i64 = 3600;

/// Hourly candles with close = 100 + index.
fn rising_candles(pair: &str, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let price = 100.0 + i as f64;
            Candle::new(
                pair,
                "1h",
                price,
                price + 0.5,
                price - 0.5,
                price,
                1_000.0,
                Utc.timestamp_opt(i as i64 * HOUR, 0).unwrap(),
                true,
            )
        })
        .collect()
}

fn flat_candles(pair: &str, count: usize, price: f64) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            Candle::new(
                pair,
                "1h",
                price,
                price,
                price,
                price,
                1_000.0,
                Utc.timestamp_opt(i as i64 * HOUR, 0).unwrap(),
                true,
            )
        })
        .collect()
}

/// Buys a fixed quote amount at one timestamp and liquidates at another.
/// Every decision is appended to the shared log.
struct ScriptedStrategy {
    buy_at: i64,
    sell_at: i64,
    quote_amount: f64,
    log: Arc<Mutex<Vec<(String, i64)>>>,
}

impl Strategy for ScriptedStrategy {
    fn timeframe(&self) -> &str {
        "1h"
    }

    fn warmup_period(&self) -> usize {
        2
    }

    fn on_candle(&mut self, df: &CandleSeries, broker: &dyn Broker) -> Result<()> {
        let candle = df.last().ok_or_else(|| anyhow::anyhow!("empty dataframe"))?;
        let ts = candle.timestamp.timestamp();
        self.log.lock().unwrap().push((candle.pair.clone(), ts));

        if ts == self.buy_at {
            broker.create_order_market_quote(OrderSide::Buy, &candle.pair, self.quote_amount)?;
        } else if ts == self.sell_at {
            let (asset, _) = broker.position(&candle.pair)?;
            if asset > 0.0 {
                broker.create_order_market(OrderSide::Sell, &candle.pair, asset)?;
            }
        }
        Ok(())
    }
}

struct BacktestRun {
    bot: Bot,
    storage: Arc<MemoryStorage>,
    log: Arc<Mutex<Vec<(String, i64)>>>,
}

fn build_backtest(
    pairs: &[&str],
    candles: Vec<(&str, Vec<Candle>)>,
    buy_at: i64,
    sell_at: i64,
    quote_amount: f64,
) -> Result<BacktestRun> {
    let mut feed = HistoricalFeed::new("1h");
    for (pair, series) in candles {
        feed = feed.with_candles(pair, series);
    }
    let feed = Arc::new(feed);

    let wallet = Arc::new(
        PaperWallet::new("USDT")
            .with_asset("USDT", 10_000.0)
            .with_data_feed(feed.clone()),
    );
    let storage = Arc::new(MemoryStorage::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let factory_log = log.clone();
    let settings = Settings::new(pairs.iter().map(|p| p.to_string()).collect());
    let bot = Bot::builder(settings, wallet.clone(), move || {
        Box::new(ScriptedStrategy {
            buy_at,
            sell_at,
            quote_amount,
            log: factory_log.clone(),
        }) as Box<dyn Strategy>
    })
    .with_storage(storage.clone())
    .with_backtest(wallet)
    .build()?;

    Ok(BacktestRun { bot, storage, log })
}

#[tokio::test]
async fn test_backtest_round_trip_two_pairs() -> Result<()> {
    quantbot::logging::init();
    let run = build_backtest(
        &["BTCUSDT", "ETHUSDT"],
        vec![
            ("BTCUSDT", flat_candles("BTCUSDT", 10, 100.0)),
            ("ETHUSDT", flat_candles("ETHUSDT", 10, 10.0)),
        ],
        3 * HOUR,
        7 * HOUR,
        1_000.0,
    )?;
    run.bot.run().await?;

    // One buy and one sell per pair, every fill persisted.
    let btc_orders = run.storage.orders("BTCUSDT")?;
    let eth_orders = run.storage.orders("ETHUSDT")?;
    assert_eq!(btc_orders.len(), 2);
    assert_eq!(eth_orders.len(), 2);
    for order in btc_orders.iter().chain(eth_orders.iter()) {
        assert_eq!(order.status, OrderStatus::Filled);
    }

    // 1000 USDT at 100 buys exactly 10 units.
    assert!((btc_orders[0].quantity - 10.0).abs() < 1e-9);
    assert!((eth_orders[0].quantity - 100.0).abs() < 1e-9);

    // Ids are sequential across the whole run.
    let mut ids: Vec<u64> = btc_orders
        .iter()
        .chain(eth_orders.iter())
        .map(|o| o.id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    // Flat prices and no fees: break-even trades, full volume accounted.
    let summary = run.bot.summary();
    assert_eq!(summary.results.len(), 2);
    for result in &summary.results {
        assert_eq!(result.trades().len(), 1);
        assert!(result.profit().abs() < 1e-9);
        assert!((result.volume - 2_000.0).abs() < 1e-9);
    }

    let rendered = summary.to_string();
    assert!(rendered.contains("TOTAL"));
    assert!(rendered.contains("START PORTFOLIO = 10000.00 USDT"));
    assert!(rendered.contains("FINAL PORTFOLIO = 10000.00 USDT"));
    assert!(rendered.contains("MAX DRAWDOWN = -0.00 %"));
    Ok(())
}

#[tokio::test]
async fn test_candles_processed_in_chronological_order() -> Result<()> {
    let run = build_backtest(
        &["BTCUSDT", "ETHUSDT"],
        vec![
            ("BTCUSDT", flat_candles("BTCUSDT", 8, 100.0)),
            ("ETHUSDT", flat_candles("ETHUSDT", 8, 10.0)),
        ],
        3 * HOUR,
        6 * HOUR,
        100.0,
    )?;
    run.bot.run().await?;

    let log = run.log.lock().unwrap().clone();
    assert!(!log.is_empty());
    // Timestamps never go backwards, and equal timestamps resolve by pair
    // name so a replay is reproducible.
    for window in log.windows(2) {
        let (ref prev_pair, prev_ts) = window[0];
        let (ref next_pair, next_ts) = window[1];
        assert!(
            prev_ts < next_ts || (prev_ts == next_ts && prev_pair < next_pair),
            "out of order: {prev_pair}@{prev_ts} before {next_pair}@{next_ts}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_backtest_is_deterministic() -> Result<()> {
    let mut outcomes: Vec<(Vec<Order>, String)> = Vec::new();
    for _ in 0..2 {
        let run = build_backtest(
            &["BTCUSDT", "ETHUSDT"],
            vec![
                ("BTCUSDT", rising_candles("BTCUSDT", 12)),
                ("ETHUSDT", rising_candles("ETHUSDT", 12)),
            ],
            2 * HOUR,
            9 * HOUR,
            1_020.0,
        )?;
        run.bot.run().await?;

        let mut orders = run.storage.orders("BTCUSDT")?;
        orders.extend(run.storage.orders("ETHUSDT")?);
        outcomes.push((orders, run.bot.summary().to_string()));
    }

    assert_eq!(outcomes[0].0, outcomes[1].0);
    assert_eq!(outcomes[0].1, outcomes[1].1);
    Ok(())
}

#[tokio::test]
async fn test_profit_realized_on_rising_market() -> Result<()> {
    // Buy 1020 USDT at close 102 (10 units), sell all at close 108.
    let run = build_backtest(
        &["BTCUSDT"],
        vec![("BTCUSDT", rising_candles("BTCUSDT", 10))],
        2 * HOUR,
        8 * HOUR,
        1_020.0,
    )?;
    run.bot.run().await?;

    let summary = run.bot.summary();
    assert_eq!(summary.results.len(), 1);
    let result = &summary.results[0];
    assert_eq!(result.trades().len(), 1);
    assert!((result.profit() - 60.0).abs() < 1e-9);
    assert_eq!(result.wins().len(), 1);

    let wallet = summary.wallet.as_ref().unwrap();
    assert!((wallet.final_value - 10_060.0).abs() < 1e-9);
    assert!(wallet.max_drawdown.abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_rejected_order_is_recorded_and_run_continues() -> Result<()> {
    // The buy asks for far more quote than the wallet holds.
    let run = build_backtest(
        &["BTCUSDT"],
        vec![("BTCUSDT", flat_candles("BTCUSDT", 10, 100.0))],
        3 * HOUR,
        7 * HOUR,
        1_000_000.0,
    )?;
    run.bot.run().await?;

    // The rejection is persisted as an error order and no position exists,
    // so the later sell never happens.
    let orders = run.storage.orders("BTCUSDT")?;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Error);

    let summary = run.bot.summary();
    assert!(summary.results.is_empty() || summary.results[0].trades().is_empty());

    // Decisions kept flowing after the failed candle.
    let log = run.log.lock().unwrap();
    let last_ts = log.last().map(|(_, ts)| *ts).unwrap();
    assert_eq!(last_ts, 9 * HOUR);
    Ok(())
}

#[tokio::test]
async fn test_live_shutdown_flushes_in_flight_candles() -> Result<()> {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    let feed = Arc::new(
        HistoricalFeed::new("1h").with_candles("BTCUSDT", flat_candles("BTCUSDT", 20, 100.0)),
    );
    let wallet = Arc::new(
        PaperWallet::new("USDT")
            .with_asset("USDT", 10_000.0)
            .with_data_feed(feed.clone()),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory_log = log.clone();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();

    // Live mode: candles stream through the feed and are consumed as they
    // arrive instead of being drained from a prefilled queue.
    let bot = Arc::new(
        Bot::builder(
            Settings::new(vec!["BTCUSDT".into()]),
            wallet.clone(),
            move || {
                Box::new(ScriptedStrategy {
                    buy_at: -1,
                    sell_at: -1,
                    quote_amount: 0.0,
                    log: factory_log.clone(),
                }) as Box<dyn Strategy>
            },
        )
        .with_paper_wallet(wallet)
        .with_candle_subscription(
            "BTCUSDT",
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .build()?,
    );

    let runner = bot.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    // The external observer sees the 2 warmup preload candles plus the 20
    // streamed ones; once they are published, shutdown must still deliver
    // whatever the dispatchers have not yet flushed into the scheduler.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while seen.load(Ordering::SeqCst) < 22 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for candle stream"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bot.shutdown();
    handle.await.unwrap()?;

    // Every streamed candle reached the strategy, none were abandoned.
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 20);
    assert_eq!(log.last().unwrap().1, 19 * HOUR);
    Ok(())
}

#[tokio::test]
async fn test_warmup_gates_first_decision() -> Result<()> {
    struct GreedyStrategy {
        log: Arc<Mutex<Vec<i64>>>,
    }

    impl Strategy for GreedyStrategy {
        fn timeframe(&self) -> &str {
            "1h"
        }

        fn warmup_period(&self) -> usize {
            5
        }

        fn on_candle(&mut self, df: &CandleSeries, _broker: &dyn Broker) -> Result<()> {
            let ts = df.last().map(|c| c.timestamp.timestamp()).unwrap_or(0);
            self.log.lock().unwrap().push(ts);
            Ok(())
        }
    }

    let feed = Arc::new(
        HistoricalFeed::new("1h").with_candles("BTCUSDT", flat_candles("BTCUSDT", 10, 100.0)),
    );
    let wallet = Arc::new(
        PaperWallet::new("USDT")
            .with_asset("USDT", 10_000.0)
            .with_data_feed(feed.clone()),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory_log = log.clone();

    let bot = Bot::builder(
        Settings::new(vec!["BTCUSDT".into()]),
        wallet.clone(),
        move || {
            Box::new(GreedyStrategy {
                log: factory_log.clone(),
            }) as Box<dyn Strategy>
        },
    )
    .with_backtest(wallet)
    .build()?;
    bot.run().await?;

    // Ten candles, warmup of five: decisions start on the fifth candle.
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 6);
    assert_eq!(log[0], 4 * HOUR);
    Ok(())
}
