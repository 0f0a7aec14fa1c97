//! The RPC collaborator seam.
//!
//! The pipeline, fetcher, and poller are generic over [`RpcClient`] so they
//! can run against [`HttpRpc`] in production and the in-memory mock in
//! tests. Transport concerns (rate limiting, retries below the request
//! level) belong to the provider, not to this layer.

use alloy::primitives::B256;
use alloy::providers::{Provider, RootProvider};
use async_trait::async_trait;
use serde::Serialize;

use seine_common::error::SyncError;
use seine_common::types::{Block, Log, TraceResult, TransactionReceipt};

#[async_trait]
pub trait RpcClient: Send + Sync {
    /// The current head block, with full transaction objects.
    async fn get_latest_block(&self) -> Result<Block, SyncError>;

    async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, SyncError>;

    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>, SyncError>;

    /// All logs of the block with the given hash.
    async fn get_logs(&self, block_hash: B256) -> Result<Vec<Log>, SyncError>;

    /// Call-tracer frames for every transaction of the block.
    async fn trace_block_by_hash(&self, block_hash: B256)
    -> Result<Vec<TraceResult>, SyncError>;

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, SyncError>;
}

#[derive(Debug, Clone, Serialize)]
struct GetLogsFilter {
    #[serde(rename = "blockHash")]
    block_hash: B256,
}

#[derive(Debug, Clone, Serialize)]
struct TracerConfig {
    tracer: &'static str,
}

/// [`RpcClient`] over an alloy HTTP provider.
pub struct HttpRpc {
    provider: RootProvider,
}

impl HttpRpc {
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            provider: RootProvider::new_http(rpc_url.parse()?),
        })
    }
}

fn transport(err: impl std::fmt::Display) -> SyncError {
    SyncError::Rpc(err.to_string())
}

#[async_trait]
impl RpcClient for HttpRpc {
    async fn get_latest_block(&self) -> Result<Block, SyncError> {
        let block: Option<Block> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), ("latest", true))
            .await
            .map_err(transport)?;
        block.ok_or_else(|| SyncError::Rpc("node returned no latest block".to_string()))
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, SyncError> {
        self.provider
            .raw_request(
                "eth_getBlockByNumber".into(),
                (format!("0x{number:x}"), true),
            )
            .await
            .map_err(transport)
    }

    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>, SyncError> {
        self.provider
            .raw_request("eth_getBlockByHash".into(), (hash, true))
            .await
            .map_err(transport)
    }

    async fn get_logs(&self, block_hash: B256) -> Result<Vec<Log>, SyncError> {
        self.provider
            .raw_request("eth_getLogs".into(), (GetLogsFilter { block_hash },))
            .await
            .map_err(transport)
    }

    async fn trace_block_by_hash(
        &self,
        block_hash: B256,
    ) -> Result<Vec<TraceResult>, SyncError> {
        self.provider
            .raw_request(
                "debug_traceBlockByHash".into(),
                (block_hash, TracerConfig { tracer: "callTracer" }),
            )
            .await
            .map_err(transport)
    }

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, SyncError> {
        self.provider
            .raw_request("eth_getTransactionReceipt".into(), (hash,))
            .await
            .map_err(transport)
    }
}
