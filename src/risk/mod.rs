use crate::amm::BinRange;
use crate::engine::{EngineContext, PoolState};
use crate::models::{FeeSample, Position, ScanReport};
use crate::retry::with_backoff;
use crate::valuation;
use crate::{EngineError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Rolling baseline the volume-drop detector compares against
#[derive(Debug, Default)]
pub struct RiskState {
    volume_baseline: HashMap<String, f64>, // per pool, EWMA of 24h volume
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub failed: Vec<(String, String)>, // (pool id, reason)
}

/// Circuit breakers: drawdown enforcement, volume-drop detection,
/// proportional reduction and emergency liquidation.
///
/// Every method re-reads current data before acting; nothing here caches a
/// position across cycles, so double-triggering degrades to a redundant
/// no-op rather than an inconsistent partial state.
pub struct RiskManager {
    ctx: EngineContext,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            state: Mutex::new(RiskState::default()),
        }
    }

    /// Recompute drawdown for every tracked position from fresh chain and
    /// oracle data; positions past the configured threshold get partially
    /// closed by `reduction_bps`. Also checkpoints the fee series.
    pub async fn enforce_all_circuit_breakers(&self) -> ScanReport {
        let mut report = ScanReport::default();

        let positions = match self.ctx.positions.list().await {
            Ok(positions) => positions,
            Err(e) => {
                // Storage failure skips the whole cycle; next tick retries
                tracing::error!("Risk cycle skipped, position store unreadable: {}", e);
                report.fail("store", e);
                return report;
            }
        };

        let mut pools: HashMap<String, Option<PoolScan>> = HashMap::new();

        for position in positions {
            let scan = match pool_scan_cached(&self.ctx, &mut pools, &position.pool_id).await {
                Some(scan) => scan,
                None => {
                    report.fail(&position.id, "pool state unavailable");
                    continue;
                }
            };

            let Some(chain) = scan.chain.iter().find(|c| c.id == position.id) else {
                // No longer on chain; the sync pass will drop it
                tracing::debug!("Position {} not found on chain, skipping", position.id);
                continue;
            };

            let snapshot = EngineContext::snapshot_for(&scan.state, chain);
            let enriched = valuation::valuate(&position, &snapshot);

            // Fee checkpoint for the APR series
            if let (Some(value), Some(quote_usd)) =
                (enriched.current_value_usd, scan.state.quote_usd)
            {
                let sample = FeeSample {
                    timestamp_ms: Utc::now().timestamp_millis(),
                    fee_x: chain.fee_x,
                    fee_y: chain.fee_y,
                    fees_usd: valuation::fees_usd(
                        chain.fee_x,
                        chain.fee_y,
                        scan.state.active.price,
                        quote_usd,
                    ),
                    position_value_usd: value,
                };
                if let Err(e) = self
                    .ctx
                    .positions
                    .append_fee_sample(&position.id, &sample)
                    .await
                {
                    tracing::warn!("Failed to record fee sample for {}: {}", position.id, e);
                }
            }

            if let Err(e) = self.ctx.positions.put(&enriched).await {
                report.fail(&position.id, e);
                continue;
            }

            // Missing price data isolates to this position
            let Some(current_value) = enriched.current_value_usd else {
                report.fail(&position.id, "no price data");
                continue;
            };

            if position.snapshot_value_usd <= 0.0 {
                report.ok();
                continue;
            }

            let drawdown =
                (position.snapshot_value_usd - current_value) / position.snapshot_value_usd;

            if drawdown > self.ctx.config.risk.max_drawdown_pct {
                tracing::warn!(
                    "Drawdown breaker tripped for {}: {:.1}% (limit {:.1}%)",
                    position.id,
                    drawdown * 100.0,
                    self.ctx.config.risk.max_drawdown_pct * 100.0
                );
                match reduce_position(&self.ctx, &enriched, self.ctx.config.risk.reduction_bps)
                    .await
                {
                    Ok(()) => report.ok(),
                    Err(e) => report.fail(&position.id, e),
                }
            } else {
                report.ok();
            }
        }

        report
    }

    /// Pure detector: true when any monitored pool's 24h volume has fallen
    /// to `ratio_threshold` of its rolling baseline or below. Mutates only
    /// the baseline; the caller decides the response.
    pub async fn check_volume_drop(&self, ratio_threshold: f64) -> Result<bool> {
        let mut observed = Vec::new();
        for pool_id in &self.ctx.config.pools {
            match self.ctx.oracle.get_market(pool_id).await {
                Ok(market) => observed.push((pool_id.clone(), market.volume_24h_usd)),
                Err(e) => {
                    tracing::warn!("Volume lookup failed for {}: {}", pool_id, e);
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        let mut dropped = false;

        for (pool_id, volume) in observed {
            if let Some(&baseline) = state.volume_baseline.get(&pool_id) {
                if baseline > 0.0 && volume / baseline <= ratio_threshold {
                    tracing::warn!(
                        "Volume drop in {}: {:.0} vs baseline {:.0}",
                        pool_id,
                        volume,
                        baseline
                    );
                    dropped = true;
                }
            }
            let next = match state.volume_baseline.get(&pool_id) {
                Some(&baseline) => 0.8 * baseline + 0.2 * volume,
                None => volume,
            };
            state.volume_baseline.insert(pool_id, next);
        }

        state.last_check = Some(Utc::now());
        Ok(dropped)
    }

    /// Partially close every tracked position by `bps`. Best effort: a
    /// per-position failure is logged and the scan continues.
    pub async fn adjust_position_size(&self, bps: u16) -> ScanReport {
        let mut report = ScanReport::default();

        let positions = match self.ctx.positions.list().await {
            Ok(positions) => positions,
            Err(e) => {
                report.fail("store", e);
                return report;
            }
        };

        for position in positions {
            match reduce_position(&self.ctx, &position, bps).await {
                Ok(()) => report.ok(),
                Err(e) => {
                    tracing::error!("Failed to reduce {}: {}", position.id, e);
                    report.fail(&position.id, e);
                }
            }
        }

        report
    }

    /// Emergency path: fully close every tracked position in parallel,
    /// collecting per-position results without early exit.
    pub async fn close_all_positions(&self) -> ScanReport {
        let mut report = ScanReport::default();

        let positions = match self.ctx.positions.list().await {
            Ok(positions) => positions,
            Err(e) => {
                report.fail("store", e);
                return report;
            }
        };

        let mut handles = Vec::with_capacity(positions.len());
        for position in positions {
            let ctx = self.ctx.clone();
            let id = position.id.clone();
            let handle =
                tokio::spawn(async move { reduce_position(&ctx, &position, 10_000).await });
            handles.push((id, handle));
        }

        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(())) => report.ok(),
                Ok(Err(e)) => report.fail(&id, e),
                Err(e) => report.fail(&id, format!("close task panicked: {}", e)),
            }
        }

        report
    }

    /// Reconcile the store against the chain's source-of-truth position
    /// list: track what the chain has, drop what it no longer has. An
    /// unreachable pool is recorded and skipped; the rest still reconcile.
    pub async fn sync_positions_with_chain(&self) -> SyncReport {
        let mut sync = SyncReport::default();

        let tracked = match self.ctx.positions.list().await {
            Ok(tracked) => tracked,
            Err(e) => {
                tracing::error!("Sync skipped, position store unreadable: {}", e);
                sync.failed.push(("store".to_string(), e.to_string()));
                return sync;
            }
        };

        let mut pools: Vec<String> = self.ctx.config.pools.clone();
        for position in &tracked {
            if !pools.contains(&position.pool_id) {
                pools.push(position.pool_id.clone());
            }
        }

        for pool_id in pools {
            match self.sync_pool(&pool_id, &tracked).await {
                Ok((added, removed)) => {
                    sync.added += added;
                    sync.removed += removed;
                }
                Err(e) => {
                    tracing::warn!("Sync failed for pool {}: {}", pool_id, e);
                    sync.failed.push((pool_id, e.to_string()));
                }
            }
        }

        sync
    }

    async fn sync_pool(&self, pool_id: &str, tracked: &[Position]) -> Result<(usize, usize)> {
        let owner = self.ctx.config.owner.clone();
        let chain = with_backoff("get_user_positions", || {
            self.ctx.amm.get_user_positions(pool_id, &owner)
        })
        .await
        .map_err(EngineError::from)?;

        let state = self.ctx.pool_state(pool_id).await?;
        let mut added = 0;
        let mut removed = 0;

        for chain_position in &chain {
            if tracked.iter().any(|p| p.id == chain_position.id) {
                continue;
            }

            let snapshot = EngineContext::snapshot_for(&state, chain_position);
            let value = state
                .quote_usd
                .map(|q| {
                    chain_position.amount_x * snapshot.bin_price * q + chain_position.amount_y * q
                })
                .unwrap_or(0.0);

            let position = Position::new(
                chain_position.id.clone(),
                pool_id.to_string(),
                chain_position.min_bin,
                chain_position.max_bin,
                state.active.bin_id,
                value,
            );
            self.ctx.positions.put(&position).await?;
            tracing::info!("Now tracking on-chain position {}", position.id);
            added += 1;
        }

        for position in tracked.iter().filter(|p| p.pool_id == pool_id) {
            if chain.iter().any(|c| c.id == position.id) {
                continue;
            }
            self.ctx.positions.delete(&position.id).await?;
            self.ctx.positions.delete_fee_history(&position.id).await?;
            tracing::info!("Dropped {}, no longer on chain", position.id);
            removed += 1;
        }

        Ok((added, removed))
    }
}

struct PoolScan {
    state: PoolState,
    chain: Vec<crate::amm::ChainPosition>,
}

/// Fetch pool state + chain positions once per pool per scan
async fn pool_scan_cached<'a>(
    ctx: &EngineContext,
    cache: &'a mut HashMap<String, Option<PoolScan>>,
    pool_id: &str,
) -> Option<&'a PoolScan> {
    if !cache.contains_key(pool_id) {
        let scan = match ctx.pool_state(pool_id).await {
            Ok(state) => {
                let owner = ctx.config.owner.clone();
                match with_backoff("get_user_positions", || {
                    ctx.amm.get_user_positions(pool_id, &owner)
                })
                .await
                {
                    Ok(chain) => Some(PoolScan { state, chain }),
                    Err(e) => {
                        tracing::warn!("Chain read failed for {}: {}", pool_id, e);
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Pool state failed for {}: {}", pool_id, e);
                None
            }
        };
        cache.insert(pool_id.to_string(), scan);
    }
    cache.get(pool_id).and_then(|scan| scan.as_ref())
}

/// Close `bps` of one position against fresh chain data.
///
/// Holds the position's advisory lock for the duration; a concurrent
/// trigger on the same position skips instead of double-closing. A full
/// close (10000 bps) claims fees, closes on-chain and drops the record;
/// a partial close re-baselines `snapshot_value_usd` to the remaining
/// value so the drawdown breaker does not re-trip on the same move.
pub async fn reduce_position(
    ctx: &EngineContext,
    position: &Position,
    bps: u16,
) -> Result<()> {
    let Some(_guard) = ctx.locks.try_acquire(&position.id) else {
        return Err(EngineError::Other(format!(
            "skipped {}: another action in flight",
            position.id
        )));
    };

    // Re-read on-chain state immediately before mutating
    let owner = ctx.config.owner.clone();
    let chain = with_backoff("get_user_positions", || {
        ctx.amm.get_user_positions(&position.pool_id, &owner)
    })
    .await
    .map_err(EngineError::from)?;

    let Some(chain_position) = chain.iter().find(|c| c.id == position.id) else {
        return Err(EngineError::Other(format!(
            "{} no longer on chain",
            position.id
        )));
    };

    let range = BinRange {
        min_bin: chain_position.min_bin,
        max_bin: chain_position.max_bin,
    };
    let full_close = bps >= 10_000;

    let position_id = position.id.clone();
    with_backoff("remove_liquidity", || {
        ctx.amm
            .remove_liquidity(&position_id, range, bps, full_close)
    })
    .await
    .map_err(EngineError::from)?;

    if full_close {
        ctx.positions.delete(&position.id).await?;
        ctx.positions.delete_fee_history(&position.id).await?;
        tracing::info!("Closed position {} completely", position.id);
    } else {
        let state = ctx.pool_state(&position.pool_id).await?;
        let remaining_fraction = 1.0 - bps as f64 / 10_000.0;

        let mut updated = position.clone();
        if let Some(quote_usd) = state.quote_usd {
            let x_usd = state.active.price * quote_usd;
            let value = chain_position.amount_x * x_usd + chain_position.amount_y * quote_usd;
            let remaining = value * remaining_fraction;
            updated.snapshot_value_usd = remaining;
            updated.current_value_usd = Some(remaining);
        } else {
            updated.snapshot_value_usd *= remaining_fraction;
        }
        ctx.positions.put(&updated).await?;
        tracing::info!(
            "Reduced position {} by {} bps, new baseline ${:.2}",
            position.id,
            bps,
            updated.snapshot_value_usd
        );
    }

    Ok(())
}
