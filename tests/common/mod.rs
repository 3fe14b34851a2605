use async_trait::async_trait;
use lpbot::amm::{
    ActiveBin, AmmClient, AmmError, BinRange, ChainPosition, ClaimedFees, PoolInfo, RemovalResult,
};
use lpbot::engine::{EngineContext, KeyLocks};
use lpbot::oracle::{MarketData, PriceOracle};
use lpbot::store::{MemoryOrderStore, MemoryPositionStore};
use lpbot::{EngineConfig, EngineError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted in-memory AMM: tests seed chain positions and the active bin,
/// and inspect the liquidity calls the engine made.
#[derive(Default)]
pub struct ScriptedAmm {
    pub active: Mutex<HashMap<String, ActiveBin>>,
    pub chain: Mutex<HashMap<String, Vec<ChainPosition>>>,
    pub removals: Mutex<Vec<(String, u16, bool)>>,
    pub opened: Mutex<Vec<(String, f64, f64, i32, i32)>>,
    pub fail_remove: Mutex<HashSet<String>>,
    next_id: AtomicU32,
}

impl ScriptedAmm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_active(&self, pool_id: &str, bin_id: i32, price: f64) {
        self.active
            .lock()
            .unwrap()
            .insert(pool_id.to_string(), ActiveBin { bin_id, price });
    }

    pub fn seed_position(&self, position: ChainPosition) {
        self.chain
            .lock()
            .unwrap()
            .entry(position.pool_id.clone())
            .or_default()
            .push(position);
    }

    pub fn fail_removals_for(&self, position_id: &str) {
        self.fail_remove
            .lock()
            .unwrap()
            .insert(position_id.to_string());
    }

    pub fn removal_count(&self) -> usize {
        self.removals.lock().unwrap().len()
    }
}

#[async_trait]
impl AmmClient for ScriptedAmm {
    async fn get_active_bin(&self, pool_id: &str) -> Result<ActiveBin, AmmError> {
        self.active
            .lock()
            .unwrap()
            .get(pool_id)
            .copied()
            .ok_or_else(|| AmmError::Rejected(format!("unknown pool {}", pool_id)))
    }

    async fn get_pool(&self, pool_id: &str) -> Result<PoolInfo, AmmError> {
        Ok(PoolInfo {
            pool_id: pool_id.to_string(),
            mint_y: "MINTY".to_string(),
        })
    }

    async fn get_user_positions(
        &self,
        pool_id: &str,
        _owner: &str,
    ) -> Result<Vec<ChainPosition>, AmmError> {
        Ok(self
            .chain
            .lock()
            .unwrap()
            .get(pool_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_position(
        &self,
        pool_id: &str,
        amount_x: f64,
        amount_y: f64,
        range: BinRange,
    ) -> Result<String, AmmError> {
        let id = format!("pos-{}", 100 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.opened.lock().unwrap().push((
            id.clone(),
            amount_x,
            amount_y,
            range.min_bin,
            range.max_bin,
        ));
        self.chain
            .lock()
            .unwrap()
            .entry(pool_id.to_string())
            .or_default()
            .push(ChainPosition {
                id: id.clone(),
                pool_id: pool_id.to_string(),
                min_bin: range.min_bin,
                max_bin: range.max_bin,
                amount_x,
                amount_y,
                fee_x: 0.0,
                fee_y: 0.0,
            });
        Ok(id)
    }

    async fn add_liquidity(
        &self,
        _position_id: &str,
        _amount_x: f64,
        _amount_y: f64,
    ) -> Result<(), AmmError> {
        Ok(())
    }

    async fn remove_liquidity(
        &self,
        position_id: &str,
        _range: BinRange,
        bps: u16,
        claim_and_close: bool,
    ) -> Result<RemovalResult, AmmError> {
        if self.fail_remove.lock().unwrap().contains(position_id) {
            return Err(AmmError::Rejected("scripted failure".to_string()));
        }

        let mut chain = self.chain.lock().unwrap();
        let mut removed = RemovalResult {
            tx_signature: "sig".to_string(),
            amount_x: 0.0,
            amount_y: 0.0,
        };

        for positions in chain.values_mut() {
            if let Some(index) = positions.iter().position(|p| p.id == position_id) {
                let fraction = bps as f64 / 10_000.0;
                removed.amount_x = positions[index].amount_x * fraction;
                removed.amount_y = positions[index].amount_y * fraction;

                if claim_and_close || bps >= 10_000 {
                    positions.remove(index);
                } else {
                    positions[index].amount_x *= 1.0 - fraction;
                    positions[index].amount_y *= 1.0 - fraction;
                }
                break;
            }
        }

        self.removals
            .lock()
            .unwrap()
            .push((position_id.to_string(), bps, claim_and_close));
        Ok(removed)
    }

    async fn claim_fees(&self, position_id: &str) -> Result<ClaimedFees, AmmError> {
        let mut chain = self.chain.lock().unwrap();
        for positions in chain.values_mut() {
            if let Some(position) = positions.iter_mut().find(|p| p.id == position_id) {
                let fees = ClaimedFees {
                    fee_x: position.fee_x,
                    fee_y: position.fee_y,
                };
                position.fee_x = 0.0;
                position.fee_y = 0.0;
                return Ok(fees);
            }
        }
        Err(AmmError::StaleReference(format!(
            "{} not on chain",
            position_id
        )))
    }
}

/// Oracle answering from fixed tables
#[derive(Default)]
pub struct FixedOracle {
    pub prices: Mutex<HashMap<String, f64>>,
    pub volumes: Mutex<HashMap<String, f64>>,
}

impl FixedOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_price(&self, asset: &str, price: f64) {
        self.prices.lock().unwrap().insert(asset.to_string(), price);
    }

    pub fn set_volume(&self, asset: &str, volume: f64) {
        self.volumes
            .lock()
            .unwrap()
            .insert(asset.to_string(), volume);
    }
}

#[async_trait]
impl PriceOracle for FixedOracle {
    async fn get_usd_price(&self, asset: &str) -> lpbot::Result<f64> {
        self.prices
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .ok_or_else(|| EngineError::Oracle(format!("no price for {}", asset)))
    }

    async fn get_market(&self, asset: &str) -> lpbot::Result<MarketData> {
        let volume = self
            .volumes
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .ok_or_else(|| EngineError::Oracle(format!("no market for {}", asset)))?;
        let price = self.prices.lock().unwrap().get(asset).copied().unwrap_or(1.0);
        Ok(MarketData {
            price_usd: price,
            volume_24h_usd: volume,
        })
    }
}

pub fn chain_position(
    id: &str,
    pool_id: &str,
    min_bin: i32,
    max_bin: i32,
    amount_x: f64,
    amount_y: f64,
) -> ChainPosition {
    ChainPosition {
        id: id.to_string(),
        pool_id: pool_id.to_string(),
        min_bin,
        max_bin,
        amount_x,
        amount_y,
        fee_x: 0.0,
        fee_y: 0.0,
    }
}

pub fn test_context(amm: Arc<ScriptedAmm>, oracle: Arc<FixedOracle>) -> EngineContext {
    let config = EngineConfig {
        owner: "owner1".to_string(),
        pools: vec!["pool1".to_string()],
        ..EngineConfig::default()
    };

    EngineContext {
        config,
        positions: Arc::new(MemoryPositionStore::new()),
        orders: Arc::new(MemoryOrderStore::new()),
        amm,
        oracle,
        locks: KeyLocks::new(),
    }
}
