use crate::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Price plus the 24h volume the risk baseline feeds on
#[derive(Debug, Clone, Copy)]
pub struct MarketData {
    pub price_usd: f64,
    pub volume_24h_usd: f64,
}

/// Normalizes external price lookups into USD. May fail transiently;
/// callers isolate the failure to the item being valued.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_usd_price(&self, asset: &str) -> Result<f64>;

    async fn get_market(&self, asset: &str) -> Result<MarketData>;
}

/// DEX aggregator backed oracle
#[derive(Clone)]
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    pairs: Vec<PairData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairData {
    chain_id: String,
    price_usd: String,
    volume: VolumeData,
}

#[derive(Debug, Deserialize)]
struct VolumeData {
    h24: f64,
}

impl HttpPriceOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, asset: &str) -> Result<MarketData> {
        let url = format!("{}/tokens/{}", self.base_url, asset);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Oracle(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Oracle(format!(
                "price lookup for {} returned {}",
                asset,
                response.status()
            )));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Oracle(e.to_string()))?;

        // Prefer the Solana pair when a token trades on several chains
        let pair = data
            .pairs
            .into_iter()
            .find(|p| p.chain_id == "solana")
            .ok_or_else(|| EngineError::Oracle(format!("no solana pair for {}", asset)))?;

        let price_usd: f64 = pair
            .price_usd
            .parse()
            .map_err(|_| EngineError::Oracle(format!("unparseable price for {}", asset)))?;

        Ok(MarketData {
            price_usd,
            volume_24h_usd: pair.volume.h24,
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_usd_price(&self, asset: &str) -> Result<f64> {
        Ok(self.fetch(asset).await?.price_usd)
    }

    async fn get_market(&self, asset: &str) -> Result<MarketData> {
        self.fetch(asset).await
    }
}
