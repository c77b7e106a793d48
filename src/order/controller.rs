//! Order controller
//!
//! Single owning authority for order lifecycle state. Every submission goes
//! through here: the per-pair lock serializes in-flight submissions for one
//! pair (cross-pair submissions proceed concurrently), the order is persisted
//! on every status transition, fills update the results ledger, and an order
//! event is published for subscribers (notifiers, reporting).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::data::Candle;
use crate::error::OrderError;
use crate::exchange::{Broker, Order, OrderKind, OrderSide, OrderStatus};
use crate::notification::Notifier;
use crate::order::{OrderFeed, PairResult};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default)]
struct EntryPosition {
    quantity: f64,
    avg_price: f64,
}

/// Mark-to-market view of a pair's open position.
#[derive(Debug, Clone, Copy)]
pub struct PositionReport {
    pub quantity: f64,
    pub avg_price: f64,
    pub last_price: f64,
    pub unrealized_pnl: f64,
}

pub struct Controller {
    exchange: Arc<dyn Broker>,
    storage: Arc<dyn Storage>,
    order_feed: Arc<OrderFeed>,
    notifier: Mutex<Option<Arc<dyn Notifier>>>,
    results: Mutex<HashMap<String, PairResult>>,
    positions: Mutex<HashMap<String, EntryPosition>>,
    /// (close, timestamp) of the latest complete candle per pair.
    last_prices: Mutex<HashMap<String, (f64, DateTime<Utc>)>>,
    pair_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl Controller {
    pub fn new(
        exchange: Arc<dyn Broker>,
        storage: Arc<dyn Storage>,
        order_feed: Arc<OrderFeed>,
    ) -> Self {
        Self {
            exchange,
            storage,
            order_feed,
            notifier: Mutex::new(None),
            results: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
            last_prices: Mutex::new(HashMap::new()),
            pair_locks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *lock(&self.notifier) = Some(notifier);
    }

    /// Idempotent. Brackets the controller's bookkeeping lifetime.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("order controller started");
        }
    }

    /// Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("order controller stopped");
        }
    }

    /// Track the latest complete candle close, used for mark-to-market
    /// reporting and for timestamping rejected submissions.
    pub fn on_candle(&self, candle: &Candle) {
        lock(&self.last_prices).insert(candle.pair.clone(), (candle.close, candle.timestamp));
    }

    /// Snapshot of the per-pair results ledgers, sorted by pair.
    pub fn results(&self) -> Vec<PairResult> {
        let mut results: Vec<PairResult> = lock(&self.results).values().cloned().collect();
        results.sort_by(|a, b| a.pair.cmp(&b.pair));
        results
    }

    /// Mark-to-market view of the open position for a pair, if any.
    pub fn position_report(&self, pair: &str) -> Option<PositionReport> {
        let positions = lock(&self.positions);
        let entry = positions.get(pair).copied().filter(|p| p.quantity > 0.0)?;
        let (last_price, _) = lock(&self.last_prices).get(pair).copied()?;
        Some(PositionReport {
            quantity: entry.quantity,
            avg_price: entry.avg_price,
            last_price,
            unrealized_pnl: (last_price - entry.avg_price) * entry.quantity,
        })
    }

    fn pair_lock(&self, pair: &str) -> Arc<Mutex<()>> {
        lock(&self.pair_locks)
            .entry(pair.to_string())
            .or_default()
            .clone()
    }

    fn last_seen_time(&self, pair: &str) -> DateTime<Utc> {
        lock(&self.last_prices)
            .get(pair)
            .map(|(_, ts)| *ts)
            .unwrap_or_else(Utc::now)
    }

    fn notify_order(&self, order: &Order) {
        if let Some(notifier) = lock(&self.notifier).as_ref() {
            notifier.on_order(order);
        }
    }

    fn notify_error(&self, err: &OrderError) {
        if let Some(notifier) = lock(&self.notifier).as_ref() {
            notifier.on_error(err);
        }
    }

    /// Record a fill in the ledger: buys move the average entry price, sells
    /// realize P&L against it; both sides count toward volume.
    fn record_fill(&self, order: &Order) {
        let price = match order.filled_price {
            Some(price) => price,
            None => return,
        };

        let mut results = lock(&self.results);
        let result = results
            .entry(order.pair.clone())
            .or_insert_with(|| PairResult::new(order.pair.clone()));
        result.add_volume(price * order.quantity);

        let mut positions = lock(&self.positions);
        let entry = positions.entry(order.pair.clone()).or_default();
        match order.side {
            OrderSide::Buy => {
                let total = entry.quantity + order.quantity;
                entry.avg_price =
                    (entry.avg_price * entry.quantity + price * order.quantity) / total;
                entry.quantity = total;
            }
            OrderSide::Sell => {
                if entry.quantity > 0.0 {
                    let closed = entry.quantity.min(order.quantity);
                    result.add_trade((price - entry.avg_price) * closed);
                    entry.quantity -= closed;
                }
            }
        }
    }

    fn submit(
        &self,
        side: OrderSide,
        pair: &str,
        kind: OrderKind,
        amount: f64,
    ) -> Result<Order, OrderError> {
        let pair_lock = self.pair_lock(pair);
        let _guard = pair_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let placed = match kind {
            OrderKind::Market => self.exchange.create_order_market(side, pair, amount),
            OrderKind::MarketQuote => self.exchange.create_order_market_quote(side, pair, amount),
        };

        match placed {
            Ok(mut order) => {
                order.id = self.next_id.fetch_add(1, Ordering::SeqCst);
                if let Err(err) = self.storage.create_order(&order) {
                    // The fill happened but we could not record it: a real
                    // position the system risks forgetting. Surface loudly
                    // and still publish so observers see the fill.
                    error!(pair, id = order.id, "persist after fill failed: {err:#}");
                    self.order_feed.publish(order.clone());
                    return Err(OrderError::Storage(err.to_string()));
                }
                if order.is_filled() {
                    self.record_fill(&order);
                }
                info!(pair, id = order.id, "order placed: {order}");
                self.order_feed.publish(order.clone());
                self.notify_order(&order);
                Ok(order)
            }
            Err(err) => {
                error!(pair, %side, "order submission failed: {err}");
                let created_at = self.last_seen_time(pair);
                let order = Order {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    pair: pair.to_string(),
                    side,
                    kind,
                    quantity: amount,
                    status: OrderStatus::Error,
                    created_at,
                    filled_at: None,
                    filled_price: None,
                };
                if let Err(persist_err) = self.storage.create_order(&order) {
                    error!(pair, id = order.id, "persisting rejected order failed: {persist_err:#}");
                }
                self.order_feed.publish(order);
                self.notify_error(&err);
                Err(err)
            }
        }
    }
}

impl Broker for Controller {
    fn create_order_market(
        &self,
        side: OrderSide,
        pair: &str,
        quantity: f64,
    ) -> Result<Order, OrderError> {
        self.submit(side, pair, OrderKind::Market, quantity)
    }

    fn create_order_market_quote(
        &self,
        side: OrderSide,
        pair: &str,
        quote_amount: f64,
    ) -> Result<Order, OrderError> {
        self.submit(side, pair, OrderKind::MarketQuote, quote_amount)
    }

    fn position(&self, pair: &str) -> Result<(f64, f64), OrderError> {
        self.exchange.position(pair)
    }
}

fn lock<G>(mutex: &Mutex<G>) -> MutexGuard<'_, G> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    /// Exchange double that fills every order at a fixed price.
    struct FixedPriceExchange {
        price: f64,
    }

    impl Broker for FixedPriceExchange {
        fn create_order_market(
            &self,
            side: OrderSide,
            pair: &str,
            quantity: f64,
        ) -> Result<Order, OrderError> {
            Ok(Order {
                id: 0,
                pair: pair.to_string(),
                side,
                kind: OrderKind::Market,
                quantity,
                status: OrderStatus::Filled,
                created_at: Utc.timestamp_opt(0, 0).unwrap(),
                filled_at: Some(Utc.timestamp_opt(0, 0).unwrap()),
                filled_price: Some(self.price),
            })
        }

        fn create_order_market_quote(
            &self,
            side: OrderSide,
            pair: &str,
            quote_amount: f64,
        ) -> Result<Order, OrderError> {
            self.create_order_market(side, pair, quote_amount / self.price)
        }

        fn position(&self, _pair: &str) -> Result<(f64, f64), OrderError> {
            Ok((0.0, 0.0))
        }
    }

    /// Exchange double that rejects everything.
    struct RejectingExchange;

    impl Broker for RejectingExchange {
        fn create_order_market(
            &self,
            _side: OrderSide,
            _pair: &str,
            _quantity: f64,
        ) -> Result<Order, OrderError> {
            Err(OrderError::Exchange("rejected".into()))
        }

        fn create_order_market_quote(
            &self,
            side: OrderSide,
            pair: &str,
            quote_amount: f64,
        ) -> Result<Order, OrderError> {
            self.create_order_market(side, pair, quote_amount)
        }

        fn position(&self, _pair: &str) -> Result<(f64, f64), OrderError> {
            Ok((0.0, 0.0))
        }
    }

    fn controller(exchange: Arc<dyn Broker>) -> (Arc<Controller>, Arc<MemoryStorage>, Arc<OrderFeed>) {
        let storage = Arc::new(MemoryStorage::new());
        let feed = Arc::new(OrderFeed::new());
        let controller = Arc::new(Controller::new(exchange, storage.clone(), feed.clone()));
        (controller, storage, feed)
    }

    #[test]
    fn test_fill_persists_and_assigns_sequential_ids() {
        let (controller, storage, _feed) =
            controller(Arc::new(FixedPriceExchange { price: 100.0 }));

        let first = controller
            .create_order_market(OrderSide::Buy, "BTCUSDT", 1.0)
            .unwrap();
        let second = controller
            .create_order_market(OrderSide::Buy, "BTCUSDT", 2.0)
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let stored = storage.orders("BTCUSDT").unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|o| o.status == OrderStatus::Filled));
    }

    #[test]
    fn test_buy_then_sell_realizes_pnl() {
        let exchange = Arc::new(FixedPriceExchange { price: 100.0 });
        let (controller, _storage, _feed) = controller(exchange);

        controller
            .create_order_market(OrderSide::Buy, "BTCUSDT", 2.0)
            .unwrap();

        // A sell fill at a higher price exercises the ledger math directly.
        controller.record_fill(&Order {
            id: 3,
            pair: "BTCUSDT".into(),
            side: OrderSide::Sell,
            kind: OrderKind::Market,
            quantity: 2.0,
            status: OrderStatus::Filled,
            created_at: Utc.timestamp_opt(0, 0).unwrap(),
            filled_at: Some(Utc.timestamp_opt(0, 0).unwrap()),
            filled_price: Some(110.0),
        });

        let results = controller.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].trades().len(), 1);
        assert!((results[0].profit() - 20.0).abs() < 1e-9);
        // volume counts both sides: 2*100 + 2*110
        assert!((results[0].volume - 420.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rejected_submission_publishes_error_order() {
        let (controller, storage, feed) = controller(Arc::new(RejectingExchange));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        feed.subscribe(
            "BTCUSDT",
            Box::new(move |order: Order| {
                lock(&sink).push(order.status);
                Ok(())
            }),
            false,
        );

        let err = controller
            .create_order_market(OrderSide::Buy, "BTCUSDT", 1.0)
            .unwrap_err();
        assert!(matches!(err, OrderError::Exchange(_)));

        feed.start();
        feed.close();
        feed.join().await;
        assert_eq!(*lock(&seen), vec![OrderStatus::Error]);

        let stored = storage.orders("BTCUSDT").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, OrderStatus::Error);
        // No fill, so no trades and no volume.
        assert!(controller.results().is_empty());
    }

    #[test]
    fn test_position_report_marks_to_market() {
        let (controller, _storage, _feed) =
            controller(Arc::new(FixedPriceExchange { price: 100.0 }));

        controller
            .create_order_market(OrderSide::Buy, "BTCUSDT", 2.0)
            .unwrap();
        controller.on_candle(&Candle::new(
            "BTCUSDT",
            "1h",
            105.0,
            105.0,
            105.0,
            105.0,
            1.0,
            Utc.timestamp_opt(3600, 0).unwrap(),
            true,
        ));

        let report = controller.position_report("BTCUSDT").unwrap();
        assert!((report.quantity - 2.0).abs() < 1e-9);
        assert!((report.avg_price - 100.0).abs() < 1e-9);
        assert!((report.unrealized_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let (controller, _storage, _feed) =
            controller(Arc::new(FixedPriceExchange { price: 1.0 }));
        controller.start();
        controller.start();
        controller.stop();
        controller.stop();
    }
}
