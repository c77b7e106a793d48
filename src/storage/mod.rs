//! Durable order persistence
//!
//! The order controller persists every order status transition. A failed
//! persist after a successful exchange fill is a data-consistency risk (a
//! real position the system would forget), so storage errors are always
//! propagated to the caller rather than swallowed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::exchange::Order;
use crate::Result;

/// Order persistence contract: append and update by order id.
pub trait Storage: Send + Sync {
    fn create_order(&self, order: &Order) -> Result<()>;
    fn update_order(&self, order: &Order) -> Result<()>;
    /// All stored orders for a pair, in id order.
    fn orders(&self, pair: &str) -> Result<Vec<Order>>;
}

/// In-memory storage, the default for backtests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    orders: Mutex<BTreeMap<u64, Order>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Order>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn create_order(&self, order: &Order) -> Result<()> {
        self.lock().insert(order.id, order.clone());
        Ok(())
    }

    fn update_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.lock();
        if !orders.contains_key(&order.id) {
            anyhow::bail!("cannot update unknown order id {}", order.id);
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    fn orders(&self, pair: &str) -> Result<Vec<Order>> {
        Ok(self
            .lock()
            .values()
            .filter(|o| o.pair == pair)
            .cloned()
            .collect())
    }
}

/// JSON-file storage for runs whose results must outlive the process.
///
/// The whole order map is rewritten on every transition; order volume in a
/// single engine run is small enough that this stays cheap, and it keeps the
/// on-disk file valid JSON at all times.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    orders: Mutex<BTreeMap<u64, Order>>,
}

impl JsonFileStorage {
    /// Open or create storage at `path`. Existing content is loaded so a
    /// restarted process sees its previous orders.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let orders = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let list: Vec<Order> = serde_json::from_str(&raw)?;
            list.into_iter().map(|o| (o.id, o)).collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            orders: Mutex::new(orders),
        })
    }

    fn persist(&self, orders: &BTreeMap<u64, Order>) -> Result<()> {
        let list: Vec<&Order> = orders.values().collect();
        let raw = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Order>> {
        self.orders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for JsonFileStorage {
    fn create_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.lock();
        orders.insert(order.id, order.clone());
        self.persist(&orders)
    }

    fn update_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.lock();
        if !orders.contains_key(&order.id) {
            anyhow::bail!("cannot update unknown order id {}", order.id);
        }
        orders.insert(order.id, order.clone());
        self.persist(&orders)
    }

    fn orders(&self, pair: &str) -> Result<Vec<Order>> {
        Ok(self
            .lock()
            .values()
            .filter(|o| o.pair == pair)
            .cloned()
            .collect())
    }
}
