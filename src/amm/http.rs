use super::{
    ActiveBin, AmmClient, AmmError, BinRange, ChainPosition, ClaimedFees, PoolInfo, RemovalResult,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// REST gateway implementation of the AMM interface.
///
/// The gateway sidecar owns wallets, transaction construction and bin-price
/// math; this client only moves requests and classifies failures.
#[derive(Clone)]
pub struct HttpAmmClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OpenPositionResponse {
    position_id: String,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    error: String,
}

impl HttpAmmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, AmmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        Self::parse(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AmmError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(&body).send().await?;
        Self::parse(response).await
    }

    async fn parse<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, AmmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response
            .json::<GatewayError>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| status.to_string());

        // The gateway flags the two retryable on-chain conditions explicitly
        if message.contains("stale") {
            return Err(AmmError::StaleReference(message));
        }
        if message.contains("slippage") {
            return Err(AmmError::Slippage(message));
        }
        if status.is_client_error() {
            return Err(AmmError::Rejected(message));
        }
        Err(AmmError::Gateway {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AmmClient for HttpAmmClient {
    async fn get_active_bin(&self, pool_id: &str) -> Result<ActiveBin, AmmError> {
        self.get_json(&format!("/pools/{}/active-bin", pool_id)).await
    }

    async fn get_pool(&self, pool_id: &str) -> Result<PoolInfo, AmmError> {
        self.get_json(&format!("/pools/{}", pool_id)).await
    }

    async fn get_user_positions(
        &self,
        pool_id: &str,
        owner: &str,
    ) -> Result<Vec<ChainPosition>, AmmError> {
        self.get_json(&format!("/pools/{}/positions/{}", pool_id, owner))
            .await
    }

    async fn open_position(
        &self,
        pool_id: &str,
        amount_x: f64,
        amount_y: f64,
        range: BinRange,
    ) -> Result<String, AmmError> {
        let response: OpenPositionResponse = self
            .post_json(
                "/positions",
                json!({
                    "pool_id": pool_id,
                    "amount_x": amount_x,
                    "amount_y": amount_y,
                    "min_bin": range.min_bin,
                    "max_bin": range.max_bin,
                }),
            )
            .await?;
        Ok(response.position_id)
    }

    async fn add_liquidity(
        &self,
        position_id: &str,
        amount_x: f64,
        amount_y: f64,
    ) -> Result<(), AmmError> {
        let _: serde_json::Value = self
            .post_json(
                &format!("/positions/{}/deposit", position_id),
                json!({ "amount_x": amount_x, "amount_y": amount_y }),
            )
            .await?;
        Ok(())
    }

    async fn remove_liquidity(
        &self,
        position_id: &str,
        range: BinRange,
        bps: u16,
        claim_and_close: bool,
    ) -> Result<RemovalResult, AmmError> {
        self.post_json(
            &format!("/positions/{}/withdraw", position_id),
            json!({
                "min_bin": range.min_bin,
                "max_bin": range.max_bin,
                "bps": bps,
                "claim_and_close": claim_and_close,
            }),
        )
        .await
    }

    async fn claim_fees(&self, position_id: &str) -> Result<ClaimedFees, AmmError> {
        self.post_json(&format!("/positions/{}/claim", position_id), json!({}))
            .await
    }
}
