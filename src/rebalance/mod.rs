use crate::amm::BinRange;
use crate::config::RebalanceConfig;
use crate::engine::{EngineContext, PoolState};
use crate::models::{Position, ScanReport};
use crate::retry::with_backoff;
use crate::valuation;
use crate::{EngineError, Result};
use std::collections::HashMap;

/// True when a position has drifted far enough from its original center,
/// or close enough to either range edge, to be worth re-ranging
pub fn needs_rebalance(
    active_bin: i32,
    original_active_bin: i32,
    min_bin: i32,
    max_bin: i32,
    config: &RebalanceConfig,
) -> bool {
    active_bin <= original_active_bin - config.drift_bins
        || active_bin >= original_active_bin + config.drift_bins
        || active_bin <= min_bin + config.edge_bins
        || active_bin >= max_bin - config.edge_bins
}

/// Periodic scan that re-ranges positions drifting toward their bin-range
/// edges: close the old range, reopen the same width centered on the
/// current active bin.
pub struct RebalanceManager {
    ctx: EngineContext,
}

impl RebalanceManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// One rebalance pass. Failures are isolated per position: one bad
    /// rebalance never blocks evaluation of the rest of the scan.
    pub async fn check_and_rebalance_positions(&self) -> ScanReport {
        let mut report = ScanReport::default();

        let positions = match self.ctx.positions.list().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::error!("Rebalance cycle skipped, store unreadable: {}", e);
                report.fail("store", e);
                return report;
            }
        };

        let mut states: HashMap<String, Option<PoolState>> = HashMap::new();

        for position in positions {
            if !states.contains_key(&position.pool_id) {
                let state = match self.ctx.pool_state(&position.pool_id).await {
                    Ok(state) => Some(state),
                    Err(e) => {
                        tracing::warn!("Pool state failed for {}: {}", position.pool_id, e);
                        None
                    }
                };
                states.insert(position.pool_id.clone(), state);
            }
            let Some(state) = states.get(&position.pool_id).and_then(|s| s.as_ref()) else {
                report.fail(&position.id, "pool state unavailable");
                continue;
            };

            if !needs_rebalance(
                state.active.bin_id,
                position.original_active_bin,
                position.min_bin,
                position.max_bin,
                &self.ctx.config.rebalance,
            ) {
                report.ok();
                continue;
            }

            tracing::info!(
                "Position {} needs rebalancing: active bin {} vs range [{}, {}] (opened at {})",
                position.id,
                state.active.bin_id,
                position.min_bin,
                position.max_bin,
                position.original_active_bin
            );

            match self.rebalance_position(&position, state).await {
                Ok(new_id) => {
                    tracing::info!("Rebalanced {} into {}", position.id, new_id);
                    report.ok();
                }
                Err(e) => {
                    tracing::error!("Rebalance failed for {}: {}", position.id, e);
                    report.fail(&position.id, e);
                }
            }
        }

        report
    }

    /// Close the position fully (claiming fees), reopen the same half-width
    /// centered on the current active bin, and carry the P&L baseline
    /// forward adjusted for the realized fees.
    async fn rebalance_position(&self, position: &Position, state: &PoolState) -> Result<String> {
        let Some(_guard) = self.ctx.locks.try_acquire(&position.id) else {
            return Err(EngineError::Other(format!(
                "skipped {}: another action in flight",
                position.id
            )));
        };

        // Fresh chain read before the irreversible part
        let owner = self.ctx.config.owner.clone();
        let chain = with_backoff("get_user_positions", || {
            self.ctx.amm.get_user_positions(&position.pool_id, &owner)
        })
        .await
        .map_err(EngineError::from)?;

        let Some(chain_position) = chain.iter().find(|c| c.id == position.id) else {
            return Err(EngineError::Other(format!(
                "{} no longer on chain",
                position.id
            )));
        };

        let position_id = position.id.clone();
        let fees = with_backoff("claim_fees", || self.ctx.amm.claim_fees(&position_id))
            .await
            .map_err(EngineError::from)?;

        let range = BinRange {
            min_bin: chain_position.min_bin,
            max_bin: chain_position.max_bin,
        };
        let removal = with_backoff("remove_liquidity", || {
            self.ctx
                .amm
                .remove_liquidity(&position_id, range, 10_000, true)
        })
        .await
        .map_err(EngineError::from)?;

        // Same half-width, recentered on the current active bin
        let half_width = ((position.max_bin - position.min_bin) / 2).max(1);
        let new_range = BinRange {
            min_bin: state.active.bin_id - half_width,
            max_bin: state.active.bin_id + half_width,
        };

        let pool_id = position.pool_id.clone();
        let new_id = with_backoff("open_position", || {
            self.ctx.amm.open_position(
                &pool_id,
                removal.amount_x,
                removal.amount_y,
                new_range,
            )
        })
        .await
        .map_err(EngineError::from)?;

        let realized_fees_usd = state
            .quote_usd
            .map(|q| valuation::fees_usd(fees.fee_x, fees.fee_y, state.active.price, q))
            .unwrap_or(0.0);

        let mut reopened = Position::new(
            new_id.clone(),
            position.pool_id.clone(),
            new_range.min_bin,
            new_range.max_bin,
            state.active.bin_id,
            position.snapshot_value_usd + realized_fees_usd,
        );
        reopened.current_active_bin = Some(state.active.bin_id);

        self.ctx.positions.put(&reopened).await?;
        self.ctx.positions.delete(&position.id).await?;
        self.ctx.positions.delete_fee_history(&position.id).await?;

        Ok(new_id)
    }
}
