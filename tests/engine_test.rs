mod common;

use common::{chain_position, test_context, FixedOracle, ScriptedAmm};
use lpbot::models::{OrderConfig, OrderSide, OrderState, OrderType, Position};
use lpbot::orders::{self, OrderManager};
use lpbot::rebalance::RebalanceManager;
use lpbot::risk::RiskManager;
use lpbot::Engine;

fn take_profit(trigger: f64, close_bps: u16) -> OrderConfig {
    OrderConfig {
        order_type: OrderType::TakeProfit,
        trigger_price_usd: trigger,
        size_usd: None,
        close_bps: Some(close_bps),
        side: None,
    }
}

#[tokio::test]
async fn test_take_profit_partially_closes_pool_positions() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 100, 2.10);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 100.0, 50.0));

    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            500.0,
        ))
        .await
        .unwrap();

    let order = orders::build_order("pool1", &take_profit(2.0, 5000));
    ctx.orders.put(&order).await.unwrap();

    let manager = OrderManager::new("pool1", ctx.clone());
    let report = manager.poll_once().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert!(report.failed.is_empty());

    // Half the position came off on-chain
    let removals = amm.removals.lock().unwrap().clone();
    assert_eq!(removals, vec![("pos1".to_string(), 5000, false)]);

    // The order left the active set and archived Executed
    assert!(ctx.orders.list_active("pool1").await.unwrap().is_empty());
    let history = ctx.orders.history("pool1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, OrderState::Executed);

    // The P&L baseline scaled with the close
    let position = ctx.positions.get("pos1").await.unwrap().unwrap();
    assert!((position.snapshot_value_usd - 250.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_executed_order_never_refires() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 100, 2.10);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 100.0, 50.0));
    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            500.0,
        ))
        .await
        .unwrap();
    ctx.orders
        .put(&orders::build_order("pool1", &take_profit(2.0, 5000)))
        .await
        .unwrap();

    let manager = OrderManager::new("pool1", ctx.clone());
    manager.poll_once().await.unwrap();
    assert_eq!(amm.removal_count(), 1);

    // Price still beyond the trigger, but the order is terminal
    let report = manager.poll_once().await.unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(amm.removal_count(), 1);
}

#[tokio::test]
async fn test_failed_execution_archives_order_as_failed() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 100, 2.10);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 100.0, 50.0));
    amm.fail_removals_for("pos1");
    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            500.0,
        ))
        .await
        .unwrap();
    ctx.orders
        .put(&orders::build_order("pool1", &take_profit(2.0, 5000)))
        .await
        .unwrap();

    let manager = OrderManager::new("pool1", ctx.clone());
    let report = manager.poll_once().await.unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed.len(), 1);

    // The order still left the active set and carries its terminal state
    assert!(ctx.orders.list_active("pool1").await.unwrap().is_empty());
    let history = ctx.orders.history("pool1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, OrderState::Failed);

    // The position itself is untouched
    let position = ctx.positions.get("pos1").await.unwrap().unwrap();
    assert_eq!(position.snapshot_value_usd, 500.0);
}

#[tokio::test]
async fn test_limit_order_fills_inside_band() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    // 0.5% below the trigger, inside the 1% band
    amm.set_active("pool1", 100, 0.995);
    oracle.set_price("MINTY", 1.0);

    let order = orders::build_order(
        "pool1",
        &OrderConfig {
            order_type: OrderType::Limit,
            trigger_price_usd: 1.0,
            size_usd: Some(100.0),
            close_bps: None,
            side: Some(OrderSide::Y),
        },
    );
    ctx.orders.put(&order).await.unwrap();

    let manager = OrderManager::new("pool1", ctx.clone());
    let report = manager.poll_once().await.unwrap();
    assert_eq!(report.succeeded, 1);

    // Single-sided Y position below the active bin
    let opened = amm.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    let (new_id, amount_x, amount_y, min_bin, max_bin) = opened[0].clone();
    assert_eq!(amount_x, 0.0);
    assert!((amount_y - 100.0).abs() < 1e-9);
    assert_eq!((min_bin, max_bin), (90, 100));

    // And it is tracked with the order size as baseline
    let position = ctx.positions.get(&new_id).await.unwrap().unwrap();
    assert_eq!(position.snapshot_value_usd, 100.0);
    assert_eq!(position.pool_id, "pool1");
}

#[tokio::test]
async fn test_limit_order_outside_band_waits() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    // 10% below the trigger: favorable but too far from the limit price
    amm.set_active("pool1", 100, 0.90);
    oracle.set_price("MINTY", 1.0);

    ctx.orders
        .put(&orders::build_order(
            "pool1",
            &OrderConfig {
                order_type: OrderType::Limit,
                trigger_price_usd: 1.0,
                size_usd: Some(100.0),
                close_bps: None,
                side: Some(OrderSide::Y),
            },
        ))
        .await
        .unwrap();

    let manager = OrderManager::new("pool1", ctx.clone());
    let report = manager.poll_once().await.unwrap();

    assert_eq!(report.succeeded, 0);
    assert!(amm.opened.lock().unwrap().is_empty());
    assert_eq!(ctx.orders.list_active("pool1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rebalance_recenters_on_active_bin() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    // Active bin 106 against range [90, 110]: within 4 bins of the edge
    amm.set_active("pool1", 106, 2.0);
    oracle.set_price("MINTY", 1.0);
    let mut on_chain = chain_position("pos1", "pool1", 90, 110, 100.0, 100.0);
    on_chain.fee_x = 1.0;
    on_chain.fee_y = 2.0;
    amm.seed_position(on_chain);

    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            500.0,
        ))
        .await
        .unwrap();

    let manager = RebalanceManager::new(ctx.clone());
    let report = manager.check_and_rebalance_positions().await;
    assert_eq!(report.succeeded, 1);
    assert!(report.failed.is_empty());

    // Old range fully closed with fee claim, new one centered on bin 106
    let removals = amm.removals.lock().unwrap().clone();
    assert_eq!(removals, vec![("pos1".to_string(), 10_000, true)]);
    let opened = amm.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    let (new_id, amount_x, amount_y, min_bin, max_bin) = opened[0].clone();
    assert_eq!((min_bin, max_bin), (96, 116));
    assert!((amount_x - 100.0).abs() < 1e-9);
    assert!((amount_y - 100.0).abs() < 1e-9);

    // The record rolled over: old id gone, baseline carries realized fees
    // (1 X at $2 plus 2 Y at $1)
    assert!(ctx.positions.get("pos1").await.unwrap().is_none());
    let reopened = ctx.positions.get(&new_id).await.unwrap().unwrap();
    assert_eq!(reopened.original_active_bin, 106);
    assert_eq!((reopened.min_bin, reopened.max_bin), (96, 116));
    assert!((reopened.snapshot_value_usd - 504.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_drawdown_breaker_does_not_retrip_after_reduction() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    // Value 200 * $3 + 100 * $1 = $700 against a $1000 baseline: -30%
    amm.set_active("pool1", 100, 3.0);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 200.0, 100.0));
    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            1000.0,
        ))
        .await
        .unwrap();

    let manager = RiskManager::new(ctx.clone());
    let report = manager.enforce_all_circuit_breakers().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(amm.removal_count(), 1);

    // Baseline re-anchored to the remaining half
    let reduced = ctx.positions.get("pos1").await.unwrap().unwrap();
    assert!((reduced.snapshot_value_usd - 350.0).abs() < 1e-9);

    // Same prices, second pass: drawdown is flat, nothing else comes off
    let report = manager.enforce_all_circuit_breakers().await;
    assert!(report.failed.is_empty());
    assert_eq!(amm.removal_count(), 1);
}

#[tokio::test]
async fn test_volume_drop_needs_a_baseline_first() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    oracle.set_volume("pool1", 100_000.0);
    let manager = RiskManager::new(ctx);

    // First observation only seeds the baseline
    assert!(!manager.check_volume_drop(0.5).await.unwrap());

    // 30% of baseline on the next cycle trips the detector
    oracle.set_volume("pool1", 30_000.0);
    assert!(manager.check_volume_drop(0.5).await.unwrap());
}

#[tokio::test]
async fn test_sync_adopts_chain_positions_and_drops_stale_ones() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 100, 1.0);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos-chain", "pool1", 95, 105, 10.0, 10.0));
    ctx.positions
        .put(&Position::new(
            "pos-gone".to_string(),
            "pool1".to_string(),
            80,
            120,
            100,
            50.0,
        ))
        .await
        .unwrap();

    let manager = RiskManager::new(ctx.clone());
    let sync = manager.sync_positions_with_chain().await;
    assert_eq!(sync.added, 1);
    assert_eq!(sync.removed, 1);
    assert!(sync.failed.is_empty());

    // Adopted at its current value, 10 X at $1 plus 10 Y at $1
    let adopted = ctx.positions.get("pos-chain").await.unwrap().unwrap();
    assert!((adopted.snapshot_value_usd - 20.0).abs() < 1e-9);
    assert_eq!(adopted.original_active_bin, 100);

    assert!(ctx.positions.get("pos-gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sync_continues_past_an_unreachable_pool() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let mut ctx = test_context(amm.clone(), oracle.clone());
    // The broken pool comes first in the scan order
    ctx.config.pools = vec!["poolBad".to_string(), "pool1".to_string()];

    // poolBad has no active bin, so its pool reads fail
    amm.set_active("pool1", 100, 1.0);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos-chain", "pool1", 95, 105, 10.0, 10.0));
    ctx.positions
        .put(&Position::new(
            "pos-gone".to_string(),
            "pool1".to_string(),
            80,
            120,
            100,
            50.0,
        ))
        .await
        .unwrap();

    let manager = RiskManager::new(ctx.clone());
    let sync = manager.sync_positions_with_chain().await;

    // The healthy pool still reconciled both ways
    assert_eq!(sync.added, 1);
    assert_eq!(sync.removed, 1);
    assert_eq!(sync.failed.len(), 1);
    assert_eq!(sync.failed[0].0, "poolBad");

    assert!(ctx.positions.get("pos-chain").await.unwrap().is_some());
    assert!(ctx.positions.get("pos-gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_take_profit_closes_unadopted_chain_positions() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 100, 2.10);
    oracle.set_price("MINTY", 1.0);
    // pos1 is tracked; pos2 exists only on chain, not yet adopted by sync
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 100.0, 50.0));
    amm.seed_position(chain_position("pos2", "pool1", 85, 105, 40.0, 20.0));
    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            500.0,
        ))
        .await
        .unwrap();
    ctx.orders
        .put(&orders::build_order("pool1", &take_profit(2.0, 5000)))
        .await
        .unwrap();

    let manager = OrderManager::new("pool1", ctx.clone());
    let report = manager.poll_once().await.unwrap();
    assert_eq!(report.succeeded, 1);

    // Both chain positions came down, adopted or not
    let removals = amm.removals.lock().unwrap().clone();
    assert_eq!(
        removals,
        vec![
            ("pos1".to_string(), 5000, false),
            ("pos2".to_string(), 5000, false),
        ]
    );

    // Only the tracked record had a baseline to scale
    let position = ctx.positions.get("pos1").await.unwrap().unwrap();
    assert!((position.snapshot_value_usd - 250.0).abs() < 1e-9);
    assert!(ctx.positions.get("pos2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_emergency_close_isolates_failures() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 100, 1.0);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 10.0, 10.0));
    amm.seed_position(chain_position("pos2", "pool1", 90, 110, 10.0, 10.0));
    amm.fail_removals_for("pos2");

    for id in ["pos1", "pos2"] {
        ctx.positions
            .put(&Position::new(
                id.to_string(),
                "pool1".to_string(),
                90,
                110,
                100,
                20.0,
            ))
            .await
            .unwrap();
    }

    let engine = Engine::new(ctx.clone());
    let outcome = engine.emergency_close_all_positions().await;

    assert!(!outcome.success);
    assert!(outcome.reason.contains("pos2"));

    // The healthy position still closed fully
    assert!(ctx.positions.get("pos1").await.unwrap().is_none());
    assert!(ctx.positions.get("pos2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_positions_summary_reports_fresh_valuation() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm.clone(), oracle.clone());

    amm.set_active("pool1", 94, 2.0);
    oracle.set_price("MINTY", 1.0);
    amm.seed_position(chain_position("pos1", "pool1", 90, 110, 100.0, 100.0));
    ctx.positions
        .put(&Position::new(
            "pos1".to_string(),
            "pool1".to_string(),
            90,
            110,
            100,
            200.0,
        ))
        .await
        .unwrap();

    let engine = Engine::new(ctx.clone());
    let summaries = engine.get_positions_summary().await.unwrap();

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    // 100 X at $2 plus 100 Y at $1, up 50% from the $200 baseline
    assert_eq!(summary.current_value_usd, Some(300.0));
    assert_eq!(summary.percentage_change, Some(50.0));
    assert_eq!(summary.current_active_bin, Some(94));
    // Bin 94 sits 20% through [90, 110]
    assert_eq!(summary.percentage_through_range, Some(20.0));

    // Bin 94 is within 4 bins of the lower edge, so an on-demand check
    // rebalances it
    let outcome = engine.trigger_rebalance_check().await;
    assert!(outcome.success);
    assert_eq!(amm.removal_count(), 1);
}

#[tokio::test]
async fn test_submit_order_validates_and_persists() {
    let amm = ScriptedAmm::new();
    let oracle = FixedOracle::new();
    let ctx = test_context(amm, oracle);
    let engine = Engine::new(ctx.clone());

    // Limit order without side or size is refused outright
    let bad = OrderConfig {
        order_type: OrderType::Limit,
        trigger_price_usd: 1.0,
        size_usd: None,
        close_bps: None,
        side: None,
    };
    assert!(engine.submit_order("pool1", bad).await.is_err());
    assert!(ctx.orders.list_active("pool1").await.unwrap().is_empty());

    let id = engine
        .submit_order("pool1", take_profit(2.0, 10_000))
        .await
        .unwrap();

    let active = ctx.orders.list_active("pool1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, id);
    assert_eq!(active[0].state, OrderState::Active);

    let fetched = ctx.orders.get("pool1", id).await.unwrap().unwrap();
    assert_eq!(fetched.trigger_price_usd, 2.0);

    // The pool registry drives poller restoration across restarts
    assert_eq!(ctx.orders.pools().await.unwrap(), vec!["pool1".to_string()]);

    engine.shutdown();
}
