use crate::amm::BinRange;
use crate::engine::{EngineContext, PoolState};
use crate::models::{
    Order, OrderConfig, OrderSide, OrderState, OrderType, Position, ScanReport,
};
use crate::retry::with_backoff;
use crate::{EngineError, Result};
use chrono::Utc;
use uuid::Uuid;

/// Limit orders fire only inside this symmetric band around the trigger
/// price, and only at or below it. A price that gaps far through the
/// trigger is not a fill.
pub const LIMIT_TOLERANCE: f64 = 0.01;

/// Reject malformed orders synchronously; they never enter the store
pub fn validate_order(config: &OrderConfig) -> Result<()> {
    if config.trigger_price_usd <= 0.0 {
        return Err(EngineError::Validation(
            "trigger price must be positive".to_string(),
        ));
    }

    match config.order_type {
        OrderType::Limit => {
            if config.side.is_none() {
                return Err(EngineError::Validation(
                    "limit orders require a side".to_string(),
                ));
            }
            match config.size_usd {
                Some(size) if size > 0.0 => {}
                _ => {
                    return Err(EngineError::Validation(
                        "limit orders require a positive sizeUsd".to_string(),
                    ))
                }
            }
        }
        OrderType::TakeProfit | OrderType::StopLoss => match config.close_bps {
            Some(bps) if (1..=10_000).contains(&bps) => {}
            _ => {
                return Err(EngineError::Validation(
                    "closeBps must be within [1, 10000]".to_string(),
                ))
            }
        },
    }

    Ok(())
}

/// Trigger condition per order type against the current pool price
pub fn should_trigger(order: &Order, price_usd: f64) -> bool {
    let trigger = order.trigger_price_usd;
    match order.order_type {
        OrderType::Limit => {
            (price_usd - trigger).abs() <= trigger * LIMIT_TOLERANCE && price_usd <= trigger
        }
        OrderType::TakeProfit => price_usd >= trigger,
        OrderType::StopLoss => price_usd <= trigger,
    }
}

/// Evaluates and executes conditional orders for one pool.
///
/// A triggered order is deleted from the active set before execution
/// starts, so a re-entrant poll cannot re-trigger it; execution failures
/// land in the archive as Failed and are not retried automatically.
pub struct OrderManager {
    pool_id: String,
    ctx: EngineContext,
}

impl OrderManager {
    pub fn new(pool_id: impl Into<String>, ctx: EngineContext) -> Self {
        Self {
            pool_id: pool_id.into(),
            ctx,
        }
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// One poll cycle: fetch the pool price once, evaluate every active
    /// order against it.
    pub async fn poll_once(&self) -> Result<ScanReport> {
        let state = self.ctx.pool_state(&self.pool_id).await?;
        let Some(price_usd) = state.price_usd() else {
            return Err(EngineError::Oracle(format!(
                "no USD price for pool {}",
                self.pool_id
            )));
        };

        let orders = self.ctx.orders.list_active(&self.pool_id).await?;
        let mut report = ScanReport::default();

        for order in orders {
            if order.state != OrderState::Active || !should_trigger(&order, price_usd) {
                continue;
            }

            tracing::info!(
                "Order {} ({:?}) triggered at ${:.4} (trigger ${:.4})",
                order.id,
                order.order_type,
                price_usd,
                order.trigger_price_usd
            );

            // Out of the active set before the (possibly slow) execution
            if let Err(e) = self.ctx.orders.delete(&self.pool_id, order.id).await {
                report.fail(order.id.to_string(), e);
                continue;
            }

            let mut done = order.clone();
            match self.execute(&order, price_usd, &state).await {
                Ok(()) => {
                    done.state = OrderState::Executed;
                    report.ok();
                }
                Err(e) => {
                    tracing::error!("Order {} execution failed: {}", order.id, e);
                    done.state = OrderState::Failed;
                    report.fail(order.id.to_string(), e);
                }
            }

            if let Err(e) = self.ctx.orders.archive(&done).await {
                tracing::warn!("Failed to archive order {}: {}", order.id, e);
            }
        }

        Ok(report)
    }

    async fn execute(&self, order: &Order, price_usd: f64, state: &PoolState) -> Result<()> {
        match order.order_type {
            OrderType::Limit => self.execute_limit(order, price_usd, state).await,
            OrderType::TakeProfit | OrderType::StopLoss => {
                self.close_pool_positions(order).await
            }
        }
    }

    /// Convert `size_usd` at current prices and open a single-sided
    /// position on the configured side of the active bin.
    async fn execute_limit(
        &self,
        order: &Order,
        price_usd: f64,
        state: &PoolState,
    ) -> Result<()> {
        let size_usd = order
            .size_usd
            .ok_or_else(|| EngineError::Validation("limit order without sizeUsd".to_string()))?;
        let side = order
            .side
            .ok_or_else(|| EngineError::Validation("limit order without side".to_string()))?;
        let quote_usd = state
            .quote_usd
            .ok_or_else(|| EngineError::Oracle("no quote price".to_string()))?;

        let half_width = self.ctx.config.orders.position_half_width;
        let active = state.active.bin_id;

        let (amount_x, amount_y, range) = match side {
            OrderSide::X => (
                size_usd / price_usd,
                0.0,
                BinRange {
                    min_bin: active,
                    max_bin: active + half_width,
                },
            ),
            OrderSide::Y => (
                0.0,
                size_usd / quote_usd,
                BinRange {
                    min_bin: active - half_width,
                    max_bin: active,
                },
            ),
        };

        let pool_id = self.pool_id.clone();
        let new_id = with_backoff("open_position", || {
            self.ctx
                .amm
                .open_position(&pool_id, amount_x, amount_y, range)
        })
        .await
        .map_err(EngineError::from)?;

        let mut position = Position::new(
            new_id.clone(),
            self.pool_id.clone(),
            range.min_bin,
            range.max_bin,
            active,
            size_usd,
        );
        position.current_active_bin = Some(active);
        self.ctx.positions.put(&position).await?;

        tracing::info!(
            "Limit order {} filled: opened {} with ${:.2} on side {:?}",
            order.id,
            new_id,
            size_usd,
            side
        );
        Ok(())
    }

    /// Close `close_bps` of every user position the chain reports for this
    /// pool, claiming fees on a full close. The fresh chain list drives the
    /// pass, so positions the sync cycle has not adopted yet are closed
    /// too. Partial closes scale the tracked P&L baseline so the
    /// percentage change stays meaningful.
    async fn close_pool_positions(&self, order: &Order) -> Result<()> {
        let bps = order
            .close_bps
            .ok_or_else(|| EngineError::Validation("order without closeBps".to_string()))?;
        let full_close = bps >= 10_000;

        let owner = self.ctx.config.owner.clone();
        let chain = with_backoff("get_user_positions", || {
            self.ctx.amm.get_user_positions(&self.pool_id, &owner)
        })
        .await
        .map_err(EngineError::from)?;

        let positions = self.ctx.positions.list().await?;
        let mut failures = Vec::new();

        for chain_position in &chain {
            let Some(_guard) = self.ctx.locks.try_acquire(&chain_position.id) else {
                failures.push(format!("{}: another action in flight", chain_position.id));
                continue;
            };

            let range = BinRange {
                min_bin: chain_position.min_bin,
                max_bin: chain_position.max_bin,
            };
            let result = with_backoff("remove_liquidity", || {
                self.ctx
                    .amm
                    .remove_liquidity(&chain_position.id, range, bps, full_close)
            })
            .await;

            match result {
                Ok(_) => {
                    // Store bookkeeping only applies to adopted positions
                    let Some(position) = positions.iter().find(|p| p.id == chain_position.id)
                    else {
                        continue;
                    };
                    if full_close {
                        self.ctx.positions.delete(&position.id).await?;
                        self.ctx.positions.delete_fee_history(&position.id).await?;
                    } else {
                        let mut updated = position.clone();
                        let remaining = 1.0 - bps as f64 / 10_000.0;
                        updated.snapshot_value_usd *= remaining;
                        if let Some(value) = updated.current_value_usd {
                            updated.current_value_usd = Some(value * remaining);
                        }
                        self.ctx.positions.put(&updated).await?;
                    }
                }
                Err(e) => failures.push(format!("{}: {}", chain_position.id, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Other(failures.join("; ")))
        }
    }
}

/// Mint an Active order from a validated config
pub fn build_order(pool_id: &str, config: &OrderConfig) -> Order {
    Order {
        id: Uuid::new_v4(),
        pool_id: pool_id.to_string(),
        order_type: config.order_type,
        trigger_price_usd: config.trigger_price_usd,
        size_usd: config.size_usd,
        close_bps: config.close_bps,
        side: config.side,
        created_at: Utc::now(),
        state: OrderState::Active,
    }
}
