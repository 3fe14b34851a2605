use clap::Parser;
use lpbot::amm::HttpAmmClient;
use lpbot::engine::{Engine, EngineContext, KeyLocks};
use lpbot::oracle::HttpPriceOracle;
use lpbot::store::{
    MemoryOrderStore, MemoryPositionStore, OrderStore, PositionStore, RedisOrderStore,
    RedisPositionStore,
};
use lpbot::EngineConfig;
use std::sync::Arc;

const DEFAULT_ORACLE_BASE: &str = "https://api.dexscreener.com/latest/dex";

#[derive(Parser)]
#[command(name = "lpbot", about = "DLMM position risk & rebalancing engine")]
struct Cli {
    /// Run against in-memory stores, nothing persists across restarts
    #[arg(long)]
    dry_run: bool,

    /// Wallet whose positions the engine manages (overrides OWNER_WALLET)
    #[arg(long)]
    owner: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if let Some(owner) = cli.owner {
        config.owner = owner;
    }

    let amm_base = std::env::var("AMM_GATEWAY_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string());
    let oracle_base =
        std::env::var("ORACLE_BASE_URL").unwrap_or_else(|_| DEFAULT_ORACLE_BASE.to_string());

    tracing::info!("lpbot starting");
    tracing::info!("  Owner: {}", config.owner);
    tracing::info!("  Monitored pools: {}", config.pools.len());
    tracing::info!("  AMM gateway: {}", amm_base);

    let (positions, orders) = build_stores(cli.dry_run).await?;

    let ctx = EngineContext {
        config,
        positions,
        orders,
        amm: Arc::new(HttpAmmClient::new(amm_base)),
        oracle: Arc::new(HttpPriceOracle::new(oracle_base)),
        locks: KeyLocks::new(),
    };

    let engine = Engine::new(ctx);
    engine
        .initialize()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tracing::info!("All loops running. Press Ctrl+C to stop...");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Received Ctrl+C, shutting down...");
    engine.shutdown();

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lpbot=info".into()),
        )
        .init();
}

/// Redis when configured, in-memory otherwise (or under --dry-run)
async fn build_stores(
    dry_run: bool,
) -> anyhow::Result<(Arc<dyn PositionStore>, Arc<dyn OrderStore>)> {
    if dry_run {
        tracing::warn!("Dry-run mode: state will not survive a restart");
        return Ok((
            Arc::new(MemoryPositionStore::new()),
            Arc::new(MemoryOrderStore::new()),
        ));
    }

    match std::env::var("REDIS_URL") {
        Ok(redis_url) => {
            let positions = RedisPositionStore::new(&redis_url)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let orders = RedisOrderStore::new(&redis_url)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok((Arc::new(positions), Arc::new(orders)))
        }
        Err(_) => {
            tracing::warn!("REDIS_URL not set, continuing without persistence");
            Ok((
                Arc::new(MemoryPositionStore::new()),
                Arc::new(MemoryOrderStore::new()),
            ))
        }
    }
}
