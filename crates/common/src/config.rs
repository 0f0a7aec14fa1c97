use std::time::Duration;

use serde::Deserialize;

use crate::types::Network;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// RPC URL of the chain to sync.
    pub rpc_url: String,

    /// Human-readable network name used in logs.
    pub network_name: String,

    /// Chain id baked into every emitted checkpoint.
    pub chain_id: u64,

    /// Head polling interval in milliseconds (default: 1000).
    pub polling_interval_ms: u64,

    /// Depth at which blocks are considered final (default: 32).
    pub finality_block_count: u64,

    /// Optional path to a JSON file with the declared filter sources.
    pub sources_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            rpc_url: std::env::var("RPC_URL")
                .map_err(|_| anyhow::anyhow!("RPC_URL environment variable is required"))?,
            network_name: std::env::var("NETWORK_NAME")
                .unwrap_or_else(|_| "mainnet".to_string()),
            chain_id: std::env::var("CHAIN_ID")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CHAIN_ID must be a valid u64"))?,
            polling_interval_ms: std::env::var("POLLING_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("POLLING_INTERVAL_MS must be a valid u64"))?,
            finality_block_count: std::env::var("FINALITY_BLOCK_COUNT")
                .unwrap_or_else(|_| "32".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("FINALITY_BLOCK_COUNT must be a valid u64"))?,
            sources_path: std::env::var("SOURCES_PATH").ok(),
        })
    }

    /// The network description handed to the poller and pipeline.
    pub fn network(&self) -> Network {
        Network {
            name: self.network_name.clone(),
            chain_id: self.chain_id,
            finality_block_count: self.finality_block_count,
            polling_interval: Duration::from_millis(self.polling_interval_ms),
        }
    }
}
