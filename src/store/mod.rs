// Durable position/order persistence. The stores are the only shared
// mutable resources in the engine; every mutation is awaited to completion
// before the call returns, so a crash between decision and persistence
// never loses a half-applied state change.
pub mod memory;
pub mod redis;

use crate::models::{FeeSample, Order, Position};
use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::{MemoryOrderStore, MemoryPositionStore};
pub use redis::{RedisOrderStore, RedisPositionStore};

/// Persistence for position metadata plus the fee/APR time series
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Position>>;

    async fn list(&self) -> Result<Vec<Position>>;

    async fn put(&self, position: &Position) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Append-only; samples arrive in timestamp order from the risk cycle
    async fn append_fee_sample(&self, id: &str, sample: &FeeSample) -> Result<()>;

    async fn fee_history_since(&self, id: &str, since_ms: i64) -> Result<Vec<FeeSample>>;

    async fn delete_fee_history(&self, id: &str) -> Result<()>;
}

/// Persistence for conditional orders.
///
/// Active and terminal orders live in separate sets: a triggered order is
/// deleted from the active set before execution starts and archived with
/// its terminal state afterwards, so a re-entrant poll can never see it.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, pool_id: &str, id: Uuid) -> Result<Option<Order>>;

    async fn list_active(&self, pool_id: &str) -> Result<Vec<Order>>;

    async fn put(&self, order: &Order) -> Result<()>;

    async fn delete(&self, pool_id: &str, id: Uuid) -> Result<()>;

    /// Record the terminal state of an order removed from the active set
    async fn archive(&self, order: &Order) -> Result<()>;

    async fn history(&self, pool_id: &str) -> Result<Vec<Order>>;

    /// Pools that have ever received an order; used to restore per-pool
    /// pollers across restarts
    async fn pools(&self) -> Result<Vec<String>>;
}
