// Core modules
pub mod amm;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod oracle;
pub mod orders;
pub mod rebalance;
pub mod retry;
pub mod risk;
pub mod store;
pub mod valuation;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use models::*;

// Error handling
pub type Result<T, E = error::EngineError> = std::result::Result<T, E>;
