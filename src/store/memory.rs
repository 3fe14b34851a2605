use super::{OrderStore, PositionStore};
use crate::models::{FeeSample, Order, Position};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// In-memory position store backing dry-run mode; the engine falls back to
/// it when no Redis URL is configured
#[derive(Default)]
pub struct MemoryPositionStore {
    positions: Mutex<HashMap<String, Position>>,
    fees: Mutex<HashMap<String, Vec<FeeSample>>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn get(&self, id: &str) -> Result<Option<Position>> {
        Ok(self.positions.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().unwrap().values().cloned().collect())
    }

    async fn put(&self, position: &Position) -> Result<()> {
        self.positions
            .lock()
            .unwrap()
            .insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.positions.lock().unwrap().remove(id);
        Ok(())
    }

    async fn append_fee_sample(&self, id: &str, sample: &FeeSample) -> Result<()> {
        self.fees
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    async fn fee_history_since(&self, id: &str, since_ms: i64) -> Result<Vec<FeeSample>> {
        Ok(self
            .fees
            .lock()
            .unwrap()
            .get(id)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.timestamp_ms >= since_ms)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_fee_history(&self, id: &str) -> Result<()> {
        self.fees.lock().unwrap().remove(id);
        Ok(())
    }
}

/// In-memory order store for dry-run mode and tests
#[derive(Default)]
pub struct MemoryOrderStore {
    active: Mutex<HashMap<String, HashMap<Uuid, Order>>>,
    done: Mutex<HashMap<String, Vec<Order>>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get(&self, pool_id: &str, id: Uuid) -> Result<Option<Order>> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .get(pool_id)
            .and_then(|orders| orders.get(&id))
            .cloned())
    }

    async fn list_active(&self, pool_id: &str) -> Result<Vec<Order>> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .get(pool_id)
            .map(|orders| orders.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, order: &Order) -> Result<()> {
        self.active
            .lock()
            .unwrap()
            .entry(order.pool_id.clone())
            .or_default()
            .insert(order.id, order.clone());
        Ok(())
    }

    async fn delete(&self, pool_id: &str, id: Uuid) -> Result<()> {
        if let Some(orders) = self.active.lock().unwrap().get_mut(pool_id) {
            orders.remove(&id);
        }
        Ok(())
    }

    async fn archive(&self, order: &Order) -> Result<()> {
        self.done
            .lock()
            .unwrap()
            .entry(order.pool_id.clone())
            .or_default()
            .push(order.clone());
        Ok(())
    }

    async fn history(&self, pool_id: &str) -> Result<Vec<Order>> {
        Ok(self
            .done
            .lock()
            .unwrap()
            .get(pool_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn pools(&self) -> Result<Vec<String>> {
        Ok(self.active.lock().unwrap().keys().cloned().collect())
    }
}
