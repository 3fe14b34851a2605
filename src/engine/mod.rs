pub mod locks;

use crate::amm::{ActiveBin, AmmClient, ChainPosition, PoolInfo};
use crate::config::EngineConfig;
use crate::models::{ActionOutcome, OrderConfig, PositionSummary};
use crate::oracle::PriceOracle;
use crate::orders::{self, OrderManager};
use crate::rebalance::RebalanceManager;
use crate::retry::with_backoff;
use crate::risk::RiskManager;
use crate::store::{OrderStore, PositionStore};
use crate::valuation::{self, PoolSnapshot};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub use locks::{KeyGuard, KeyLocks};

/// Everything a manager needs, passed explicitly at construction. No
/// manager reaches for globals; timers live on the orchestrator.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub positions: Arc<dyn PositionStore>,
    pub orders: Arc<dyn OrderStore>,
    pub amm: Arc<dyn AmmClient>,
    pub oracle: Arc<dyn PriceOracle>,
    pub locks: KeyLocks,
}

/// Pool-level reads shared by every position in the pool during one scan
pub struct PoolState {
    pub active: ActiveBin,
    pub info: PoolInfo,
    pub quote_usd: Option<f64>,
}

impl PoolState {
    /// USD price of token X, derived from the pool's own bin price
    pub fn price_usd(&self) -> Option<f64> {
        self.quote_usd.map(|q| self.active.price * q)
    }
}

impl EngineContext {
    /// Fetch the active bin, pair metadata and quote USD price for a pool.
    /// An oracle failure degrades to `quote_usd: None` so range math still
    /// runs; AMM read failures propagate.
    pub async fn pool_state(&self, pool_id: &str) -> Result<PoolState> {
        let active = with_backoff("get_active_bin", || self.amm.get_active_bin(pool_id))
            .await
            .map_err(crate::EngineError::from)?;
        let info = with_backoff("get_pool", || self.amm.get_pool(pool_id))
            .await
            .map_err(crate::EngineError::from)?;

        let quote_usd = match self.oracle.get_usd_price(&info.mint_y).await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!("Quote price lookup failed for {}: {}", info.mint_y, e);
                None
            }
        };

        Ok(PoolState {
            active,
            info,
            quote_usd,
        })
    }

    pub fn snapshot_for(state: &PoolState, chain: &ChainPosition) -> PoolSnapshot {
        PoolSnapshot {
            active_bin: state.active.bin_id,
            bin_price: state.active.price,
            quote_usd: state.quote_usd,
            amount_x: chain.amount_x,
            amount_y: chain.amount_y,
        }
    }
}

/// The orchestrator: owns the timers, wires the managers together and
/// exposes the engine's public surface. One instance per process.
pub struct Engine {
    ctx: EngineContext,
    risk: Arc<RiskManager>,
    rebalance: Arc<RebalanceManager>,
    order_managers: Mutex<HashMap<String, Arc<OrderManager>>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(ctx: EngineContext) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            risk: Arc::new(RiskManager::new(ctx.clone())),
            rebalance: Arc::new(RebalanceManager::new(ctx.clone())),
            order_managers: Mutex::new(HashMap::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            ctx,
        })
    }

    /// Start all monitoring loops and run one immediate rebalance pass.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        tracing::info!(
            "Engine starting: risk every {:?}, rebalance every {:?}, order polling every {:?}",
            self.ctx.config.risk_interval,
            self.ctx.config.rebalance_interval,
            self.ctx.config.order_poll_interval
        );

        let report = self.rebalance.check_and_rebalance_positions().await;
        tracing::info!(
            "Initial rebalance pass: {} ok, {} failed",
            report.succeeded,
            report.failed.len()
        );

        self.spawn_risk_loop();
        self.spawn_rebalance_loop();

        // Restore per-pool order pollers across restarts
        for pool_id in self.ctx.orders.pools().await? {
            self.ensure_order_manager(&pool_id);
        }

        Ok(())
    }

    /// Cancel future timer firings. In-flight cycles finish naturally;
    /// partial liquidity operations are never interrupted mid-flight.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        tracing::info!("Engine shutdown signalled");
    }

    fn spawn_risk_loop(self: &Arc<Self>) {
        let risk = self.risk.clone();
        let config = self.ctx.config.clone();
        let mut rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(
                Instant::now() + config.risk_interval,
                config.risk_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::info!("[RISK] Tick at {}", Utc::now().format("%H:%M:%S"));

                        let sync = risk.sync_positions_with_chain().await;
                        if sync.added + sync.removed > 0 {
                            tracing::info!("  Sync: {} added, {} dropped", sync.added, sync.removed);
                        }
                        if !sync.failed.is_empty() {
                            tracing::warn!("  Sync: {} pools unreachable", sync.failed.len());
                        }

                        let report = risk.enforce_all_circuit_breakers().await;
                        if !report.failed.is_empty() {
                            tracing::warn!("  Circuit breakers: {} failures", report.failed.len());
                        }

                        match risk.check_volume_drop(config.risk.volume_drop_ratio).await {
                            Ok(true) => {
                                tracing::warn!("  Volume drop detected, reducing all positions");
                                let report = risk.adjust_position_size(config.risk.reduction_bps).await;
                                tracing::info!(
                                    "  Reduced {} positions ({} failed)",
                                    report.succeeded,
                                    report.failed.len()
                                );
                            }
                            Ok(false) => {}
                            Err(e) => tracing::warn!("  Volume check failed: {}", e),
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        self.tasks.lock().unwrap().push(handle);
    }

    fn spawn_rebalance_loop(self: &Arc<Self>) {
        let rebalance = self.rebalance.clone();
        let interval = self.ctx.config.rebalance_interval;
        let mut rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::info!("[REBALANCE] Tick at {}", Utc::now().format("%H:%M:%S"));
                        let report = rebalance.check_and_rebalance_positions().await;
                        tracing::info!(
                            "  {} positions checked, {} failures",
                            report.succeeded + report.failed.len(),
                            report.failed.len()
                        );
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        self.tasks.lock().unwrap().push(handle);
    }

    /// Lazily create the order manager (and its poll loop) for a pool
    fn ensure_order_manager(self: &Arc<Self>, pool_id: &str) -> Arc<OrderManager> {
        let mut managers = self.order_managers.lock().unwrap();
        if let Some(manager) = managers.get(pool_id) {
            return manager.clone();
        }

        let manager = Arc::new(OrderManager::new(pool_id, self.ctx.clone()));
        managers.insert(pool_id.to_string(), manager.clone());

        let poller = manager.clone();
        let interval = self.ctx.config.order_poll_interval;
        let mut rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match poller.poll_once().await {
                            Ok(report) if report.succeeded + report.failed.len() > 0 => {
                                tracing::info!(
                                    "[ORDERS {}] {} executed, {} failed",
                                    poller.pool_id(),
                                    report.succeeded,
                                    report.failed.len()
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!("[ORDERS {}] poll skipped: {}", poller.pool_id(), e);
                            }
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);

        tracing::info!("Order polling started for pool {}", pool_id);
        manager
    }

    // ------------------------------------------------------------------
    // Produced interface (consumed by the API/dashboard layer)
    // ------------------------------------------------------------------

    /// Validate and persist a conditional order, waking the pool's poller
    pub async fn submit_order(
        self: &Arc<Self>,
        pool_id: &str,
        config: OrderConfig,
    ) -> Result<uuid::Uuid> {
        orders::validate_order(&config)?;

        let order = orders::build_order(pool_id, &config);
        self.ctx.orders.put(&order).await?;
        self.ensure_order_manager(pool_id);

        tracing::info!(
            "Order {} accepted: {:?} on {} at ${}",
            order.id,
            order.order_type,
            pool_id,
            order.trigger_price_usd
        );
        Ok(order.id)
    }

    /// Freshly valued positions with daily APR, for display. Positions in
    /// pools we cannot read right now keep their last cached valuation.
    pub async fn get_positions_summary(&self) -> Result<Vec<PositionSummary>> {
        let positions = self.ctx.positions.list().await?;
        let mut states: HashMap<String, Option<(PoolState, Vec<ChainPosition>)>> = HashMap::new();
        let mut summaries = Vec::with_capacity(positions.len());

        for position in positions {
            if !states.contains_key(&position.pool_id) {
                let fetched = match self.ctx.pool_state(&position.pool_id).await {
                    Ok(state) => {
                        let owner = &self.ctx.config.owner;
                        match self
                            .ctx
                            .amm
                            .get_user_positions(&position.pool_id, owner)
                            .await
                        {
                            Ok(chain) => Some((state, chain)),
                            Err(e) => {
                                tracing::warn!("Chain read failed for {}: {}", position.pool_id, e);
                                None
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Pool state failed for {}: {}", position.pool_id, e);
                        None
                    }
                };
                states.insert(position.pool_id.clone(), fetched);
            }

            let enriched = match states.get(&position.pool_id).and_then(|s| s.as_ref()) {
                Some((state, chain)) => match chain.iter().find(|c| c.id == position.id) {
                    Some(chain_position) => {
                        let snapshot = EngineContext::snapshot_for(state, chain_position);
                        valuation::valuate(&position, &snapshot)
                    }
                    None => position.clone(),
                },
                None => position.clone(),
            };

            let day_ago_ms = (Utc::now() - chrono::Duration::hours(24)).timestamp_millis();
            let daily_apr = match self
                .ctx
                .positions
                .fee_history_since(&position.id, day_ago_ms)
                .await
            {
                Ok(samples) => enriched
                    .current_value_usd
                    .and_then(|value| valuation::daily_apr(&samples, value)),
                Err(e) => {
                    tracing::warn!("Fee history unavailable for {}: {}", position.id, e);
                    None
                }
            };

            summaries.push(PositionSummary {
                id: enriched.id.clone(),
                pool_id: enriched.pool_id.clone(),
                min_bin: enriched.min_bin,
                max_bin: enriched.max_bin,
                snapshot_value_usd: enriched.snapshot_value_usd,
                current_value_usd: enriched.current_value_usd,
                percentage_change: enriched.percentage_change,
                current_active_bin: enriched.current_active_bin,
                percentage_through_range: enriched.percentage_through_range,
                status: enriched.status,
                daily_apr,
            });
        }

        Ok(summaries)
    }

    /// On-demand rebalance pass
    pub async fn trigger_rebalance_check(&self) -> ActionOutcome {
        let report = self.rebalance.check_and_rebalance_positions().await;
        ActionOutcome::from_report("rebalance check", &report)
    }

    /// Emergency path: fully liquidate everything, reporting per-position
    /// outcomes instead of aborting on the first failure
    pub async fn emergency_close_all_positions(&self) -> ActionOutcome {
        tracing::warn!("EMERGENCY CLOSE requested for all positions");
        let report = self.risk.close_all_positions().await;
        ActionOutcome::from_report("emergency close", &report)
    }
}
