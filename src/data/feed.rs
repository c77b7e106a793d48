//! Candle data feed
//!
//! One producer task per (pair, timeframe) pulls candles from the configured
//! [`Feeder`] and publishes them into the candle bus; subscribed handlers run
//! from a single dispatch point per topic, which is what keeps the ordering
//! guarantees intact (see [`crate::data::CandleScheduler`]).

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::data::Candle;
use crate::exchange::Feeder;
use crate::feed::{EventFeed, Handler};

/// Candle pub/sub feed bound to a data source.
pub struct DataFeedSubscription {
    feeder: Arc<dyn Feeder>,
    feed: EventFeed<Candle>,
    /// (pair, timeframe) keys with at least one subscription.
    keys: Mutex<Vec<(String, String)>>,
    producers: Mutex<Vec<JoinHandle<()>>>,
}

fn topic_key(pair: &str, timeframe: &str) -> String {
    format!("{pair}--{timeframe}")
}

impl DataFeedSubscription {
    pub fn new(feeder: Arc<dyn Feeder>) -> Self {
        Self {
            feeder,
            feed: EventFeed::new(),
            keys: Mutex::new(Vec::new()),
            producers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe a handler to candles for a pair/timeframe.
    pub fn subscribe(
        &self,
        pair: &str,
        timeframe: &str,
        handler: Handler<Candle>,
        consume_once: bool,
    ) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (pair.to_string(), timeframe.to_string());
        if !keys.contains(&key) {
            keys.push(key);
        }
        self.feed
            .subscribe(&topic_key(pair, timeframe), handler, consume_once);
    }

    /// Deliver warmup candles synchronously to the handlers subscribed so
    /// far. The engine registers its own scheduler subscription only after
    /// preloading, so historical candles are not double-processed.
    pub fn preload(&self, pair: &str, timeframe: &str, candles: &[Candle]) {
        info!(pair, timeframe, count = candles.len(), "preloading candles");
        for candle in candles {
            self.feed
                .dispatch_now(&topic_key(pair, timeframe), candle.clone());
        }
    }

    /// Start producers and dispatchers.
    ///
    /// In backtest mode this waits until every producer has exhausted its
    /// historical input and every buffered candle has been dispatched, so the
    /// scheduler holds the complete dataset before the drain loop begins. In
    /// live mode it returns immediately and the producers run until
    /// [`stop`](Self::stop).
    pub async fn start(&self, backtest: bool) {
        let keys = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut producers = Vec::new();
        for (pair, timeframe) in keys {
            let feeder = self.feeder.clone();
            let tx = self.feed.sender(&topic_key(&pair, &timeframe));
            producers.push(tokio::spawn(async move {
                let mut stream = feeder.candles_subscription(&pair, &timeframe).await;
                while let Some(candle) = stream.recv().await {
                    if tx.send(candle).is_err() {
                        break;
                    }
                }
                debug!(pair, timeframe, "candle stream ended");
            }));
        }

        self.feed.start();

        if backtest {
            for result in futures::future::join_all(producers).await {
                if let Err(err) = result {
                    warn!("candle producer task failed: {err}");
                }
            }
            self.feed.close();
            self.feed.join().await;
        } else {
            *self
                .producers
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = producers;
        }
    }

    /// Stop ingestion: abort producers first, then close dispatch so already
    /// published candles can still drain to the consumer.
    pub fn stop(&self) {
        let producers = std::mem::take(
            &mut *self
                .producers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for producer in &producers {
            producer.abort();
        }
        self.feed.close();
    }

    /// Wait for dispatchers to finish after [`stop`](Self::stop).
    pub async fn join(&self) {
        self.feed.join().await;
    }
}
