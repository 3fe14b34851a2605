use std::time::Duration;

/// Drawdown / volume-drop circuit breaker thresholds
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_drawdown_pct: f64,  // fraction of snapshot value
    pub volume_drop_ratio: f64, // current/baseline at or below this trips
    pub reduction_bps: u16,     // partial-close size on a drawdown breach
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 0.20, // -20% from snapshot
            volume_drop_ratio: 0.5, // volume halved vs baseline
            reduction_bps: 5000,    // close half the position
        }
    }
}

/// Bin-drift thresholds for the rebalance scan
#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    pub drift_bins: i32, // distance from the original center bin
    pub edge_bins: i32,  // distance from either range edge
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            drift_bins: 6,
            edge_bins: 4,
        }
    }
}

/// Sizing defaults for positions opened by limit orders
#[derive(Debug, Clone)]
pub struct OrderDefaults {
    pub position_half_width: i32, // bins on the filled side of the active bin
}

impl Default for OrderDefaults {
    fn default() -> Self {
        Self {
            position_half_width: 10,
        }
    }
}

/// All engine configuration, resolved once at startup and passed to each
/// manager at construction. No manager reads the environment on its own.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub owner: String,      // wallet whose positions the engine manages
    pub pools: Vec<String>, // pools watched by sync and volume checks

    pub risk_interval: Duration,
    pub rebalance_interval: Duration,
    pub order_poll_interval: Duration,

    pub risk: RiskConfig,
    pub rebalance: RebalanceConfig,
    pub orders: OrderDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            pools: Vec::new(),
            risk_interval: Duration::from_secs(900),
            rebalance_interval: Duration::from_secs(1800),
            order_poll_interval: Duration::from_secs(60),
            risk: RiskConfig::default(),
            rebalance: RebalanceConfig::default(),
            orders: OrderDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// `OWNER_WALLET` is required; `MONITORED_POOLS` is a comma-separated
    /// pool address list.
    pub fn from_env() -> crate::Result<Self> {
        let owner = std::env::var("OWNER_WALLET")
            .map_err(|_| crate::EngineError::Validation("OWNER_WALLET not set".to_string()))?;

        let pools = std::env::var("MONITORED_POOLS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut config = EngineConfig {
            owner,
            pools,
            ..EngineConfig::default()
        };

        if let Some(secs) = env_u64("RISK_INTERVAL_SECS") {
            config.risk_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("REBALANCE_INTERVAL_SECS") {
            config.rebalance_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("ORDER_POLL_INTERVAL_SECS") {
            config.order_poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
