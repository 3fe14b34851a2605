use super::{OrderStore, PositionStore};
use crate::models::{FeeSample, Order, Position};
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

const POSITIONS_KEY: &str = "positions";
const ORDER_POOLS_KEY: &str = "orders:pools";

fn fees_key(position_id: &str) -> String {
    format!("fees:{}", position_id)
}

fn active_key(pool_id: &str) -> String {
    format!("orders:active:{}", pool_id)
}

fn done_key(pool_id: &str) -> String {
    format!("orders:done:{}", pool_id)
}

async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = Client::open(redis_url)?;

    // Bound the connection attempt so a dead Redis fails fast at startup
    let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
        .await
        .map_err(|_| {
            crate::EngineError::Storage("Redis connection timeout after 5 seconds".to_string())
        })??;

    tracing::info!("Connected to Redis at {}", redis_url);

    Ok(conn)
}

/// Position records in a hash keyed by position id; fee history in a
/// sorted set per position with the sample timestamp as score, which keeps
/// time-range queries cheap
#[derive(Clone)]
pub struct RedisPositionStore {
    conn: ConnectionManager,
}

impl RedisPositionStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            conn: connect(redis_url).await?,
        })
    }
}

#[async_trait]
impl PositionStore for RedisPositionStore {
    async fn get(&self, id: &str) -> Result<Option<Position>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(POSITIONS_KEY, id).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Position>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(POSITIONS_KEY).await?;

        let mut positions = Vec::with_capacity(raw.len());
        for json in raw {
            positions.push(serde_json::from_str(&json)?);
        }
        Ok(positions)
    }

    async fn put(&self, position: &Position) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(position)?;
        conn.hset::<_, _, _, ()>(POSITIONS_KEY, &position.id, json)
            .await?;
        tracing::debug!("Saved position {} to Redis", position.id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(POSITIONS_KEY, id).await?;
        Ok(())
    }

    async fn append_fee_sample(&self, id: &str, sample: &FeeSample) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(sample)?;
        conn.zadd::<_, _, _, ()>(fees_key(id), json, sample.timestamp_ms as f64)
            .await?;
        Ok(())
    }

    async fn fee_history_since(&self, id: &str, since_ms: i64) -> Result<Vec<FeeSample>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .zrangebyscore(fees_key(id), since_ms as f64, "+inf")
            .await?;

        let mut samples = Vec::with_capacity(raw.len());
        for json in raw {
            samples.push(serde_json::from_str(&json)?);
        }
        Ok(samples)
    }

    async fn delete_fee_history(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(fees_key(id)).await?;
        Ok(())
    }
}

/// Active orders in a hash per pool; terminal orders archived to a second
/// hash so the poll loop only ever sees the active set
#[derive(Clone)]
pub struct RedisOrderStore {
    conn: ConnectionManager,
}

impl RedisOrderStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            conn: connect(redis_url).await?,
        })
    }
}

#[async_trait]
impl OrderStore for RedisOrderStore {
    async fn get(&self, pool_id: &str, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(active_key(pool_id), id.to_string()).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self, pool_id: &str) -> Result<Vec<Order>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(active_key(pool_id)).await?;

        let mut orders = Vec::with_capacity(raw.len());
        for json in raw {
            orders.push(serde_json::from_str(&json)?);
        }
        Ok(orders)
    }

    async fn put(&self, order: &Order) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(order)?;
        conn.hset::<_, _, _, ()>(active_key(&order.pool_id), order.id.to_string(), json)
            .await?;
        conn.sadd::<_, _, ()>(ORDER_POOLS_KEY, &order.pool_id).await?;
        tracing::debug!("Saved order {} for pool {}", order.id, order.pool_id);
        Ok(())
    }

    async fn delete(&self, pool_id: &str, id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(active_key(pool_id), id.to_string())
            .await?;
        Ok(())
    }

    async fn archive(&self, order: &Order) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(order)?;
        conn.hset::<_, _, _, ()>(done_key(&order.pool_id), order.id.to_string(), json)
            .await?;
        Ok(())
    }

    async fn history(&self, pool_id: &str) -> Result<Vec<Order>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(done_key(pool_id)).await?;

        let mut orders = Vec::with_capacity(raw.len());
        for json in raw {
            orders.push(serde_json::from_str(&json)?);
        }
        Ok(orders)
    }

    async fn pools(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(ORDER_POOLS_KEY).await?)
    }
}
