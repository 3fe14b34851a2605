// Narrow interface onto the external AMM client. The engine never
// reimplements AMM mechanics (bin math, swap routing, tx construction);
// it only consumes these reads and liquidity mutations.
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpAmmClient;

/// AMM-side failure, split into retryable and terminal classes so the
/// engine can decide whether backoff is worth it
#[derive(Debug, Error)]
pub enum AmmError {
    #[error("amm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("amm gateway error {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("stale chain reference: {0}")]
    StaleReference(String),

    #[error("slippage band missed: {0}")]
    Slippage(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl AmmError {
    pub fn is_transient(&self) -> bool {
        match self {
            AmmError::Http(_) => true,
            AmmError::Gateway { status, .. } => *status >= 500,
            AmmError::StaleReference(_) | AmmError::Slippage(_) => true,
            AmmError::Rejected(_) => false,
        }
    }
}

/// The bin currently containing the trading price, with the price of one
/// token X in token Y terms at that bin
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ActiveBin {
    pub bin_id: i32,
    pub price: f64,
}

/// Pair metadata needed to value positions. Amounts and fees everywhere on
/// this interface are UI units; the gateway owns token-decimal scaling.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolInfo {
    pub pool_id: String,
    pub mint_y: String, // quote mint, priced through the oracle
}

/// A position as the chain reports it (amounts in UI units, fees unclaimed)
#[derive(Debug, Clone, Deserialize)]
pub struct ChainPosition {
    pub id: String,
    pub pool_id: String,
    pub min_bin: i32,
    pub max_bin: i32,
    pub amount_x: f64,
    pub amount_y: f64,
    pub fee_x: f64,
    pub fee_y: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BinRange {
    pub min_bin: i32,
    pub max_bin: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemovalResult {
    pub tx_signature: String,
    pub amount_x: f64,
    pub amount_y: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClaimedFees {
    pub fee_x: f64,
    pub fee_y: f64,
}

/// The liquidity operations the engine drives. All mutations are
/// irreversible on-chain; callers must treat a slow call as possibly
/// applied and re-read before acting again.
#[async_trait]
pub trait AmmClient: Send + Sync {
    async fn get_active_bin(&self, pool_id: &str) -> Result<ActiveBin, AmmError>;

    async fn get_pool(&self, pool_id: &str) -> Result<PoolInfo, AmmError>;

    async fn get_user_positions(
        &self,
        pool_id: &str,
        owner: &str,
    ) -> Result<Vec<ChainPosition>, AmmError>;

    async fn open_position(
        &self,
        pool_id: &str,
        amount_x: f64,
        amount_y: f64,
        range: BinRange,
    ) -> Result<String, AmmError>;

    async fn add_liquidity(
        &self,
        position_id: &str,
        amount_x: f64,
        amount_y: f64,
    ) -> Result<(), AmmError>;

    async fn remove_liquidity(
        &self,
        position_id: &str,
        range: BinRange,
        bps: u16,
        claim_and_close: bool,
    ) -> Result<RemovalResult, AmmError>;

    async fn claim_fees(&self, position_id: &str) -> Result<ClaimedFees, AmmError>;
}
