use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the active bin sits relative to a position's range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RangeStatus {
    InRange,
    NearEdge,
    OutOfRange,
}

/// One managed concentrated-liquidity position.
///
/// `min_bin`/`max_bin`/`original_active_bin`/`snapshot_value_usd` are ground
/// truth written at registration (and rewritten on rebalance). Everything in
/// the "derived" block is recomputed every valuation cycle and cached here
/// only for display and APR math.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,   // chain position address, stable for its lifetime
    pub pool_id: String,
    pub min_bin: i32,
    pub max_bin: i32,
    pub original_active_bin: i32,
    pub snapshot_value_usd: f64, // USD value at creation, P&L baseline
    pub created_at: DateTime<Utc>,

    // Derived, never authoritative
    #[serde(default)]
    pub current_value_usd: Option<f64>,
    #[serde(default)]
    pub percentage_change: Option<f64>,
    #[serde(default)]
    pub current_active_bin: Option<i32>,
    #[serde(default)]
    pub percentage_through_range: Option<f64>,
    #[serde(default)]
    pub status: Option<RangeStatus>,
}

impl Position {
    pub fn new(
        id: String,
        pool_id: String,
        min_bin: i32,
        max_bin: i32,
        original_active_bin: i32,
        snapshot_value_usd: f64,
    ) -> Self {
        Self {
            id,
            pool_id,
            min_bin,
            max_bin,
            original_active_bin,
            snapshot_value_usd,
            created_at: Utc::now(),
            current_value_usd: None,
            percentage_change: None,
            current_active_bin: None,
            percentage_through_range: None,
            status: None,
        }
    }
}

/// Fee checkpoint appended each risk cycle; the series drives daily APR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSample {
    pub timestamp_ms: i64,
    pub fee_x: f64,
    pub fee_y: f64,
    pub fees_usd: f64,
    pub position_value_usd: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    TakeProfit,
    StopLoss,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderState {
    Active,
    Executed,
    Failed,
}

/// A conditional instruction awaiting a price trigger.
///
/// State machine: Active -> Executed | Failed, exactly one terminal
/// transition, no re-activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub pool_id: String,
    pub order_type: OrderType,
    pub trigger_price_usd: f64,
    pub size_usd: Option<f64>,   // required for Limit
    pub close_bps: Option<u16>,  // required for TakeProfit/StopLoss, 1..=10000
    pub side: Option<OrderSide>, // required for Limit
    pub created_at: DateTime<Utc>,
    pub state: OrderState,
}

/// Submission payload for `Engine::submit_order`; validated before an
/// `Order` is minted from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    pub order_type: OrderType,
    pub trigger_price_usd: f64,
    #[serde(default)]
    pub size_usd: Option<f64>,
    #[serde(default)]
    pub close_bps: Option<u16>,
    #[serde(default)]
    pub side: Option<OrderSide>,
}

/// Snapshot handed to the dashboard layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub id: String,
    pub pool_id: String,
    pub min_bin: i32,
    pub max_bin: i32,
    pub snapshot_value_usd: f64,
    pub current_value_usd: Option<f64>,
    pub percentage_change: Option<f64>,
    pub current_active_bin: Option<i32>,
    pub percentage_through_range: Option<f64>,
    pub status: Option<RangeStatus>,
    pub daily_apr: Option<f64>,
}

/// Aggregate result of a batch scan; per-item failures never abort the scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub succeeded: usize,
    pub failed: Vec<(String, String)>, // (item id, reason)
}

impl ScanReport {
    pub fn ok(&mut self) {
        self.succeeded += 1;
    }

    pub fn fail(&mut self, id: impl Into<String>, reason: impl ToString) {
        self.failed.push((id.into(), reason.to_string()));
    }
}

/// Structured success/failure of a public engine operation; the engine
/// boundary never throws
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub reason: String,
}

impl ActionOutcome {
    pub fn from_report(action: &str, report: &ScanReport) -> Self {
        if report.failed.is_empty() {
            ActionOutcome {
                success: true,
                reason: format!("{}: {} succeeded", action, report.succeeded),
            }
        } else {
            ActionOutcome {
                success: false,
                reason: format!(
                    "{}: {} succeeded, {} failed ({})",
                    action,
                    report.succeeded,
                    report.failed.len(),
                    report
                        .failed
                        .iter()
                        .map(|(id, why)| format!("{}: {}", id, why))
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            }
        }
    }
}
