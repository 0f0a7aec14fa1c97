//! Head polling.
//!
//! Periodically fetches the latest block with full transactions and feeds
//! it to the pipeline. The poller never injects failures into the pipeline;
//! it carries its own error budget on the shared backoff schedule.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use seine_common::error::SyncError;
use seine_common::types::{Block, Network};

use alloy::primitives::B256;

use crate::backoff::ErrorBudget;
use crate::rpc::RpcClient;

pub struct Poller<C: RpcClient> {
    rpc: Arc<C>,
    network: Network,
    blocks_tx: mpsc::Sender<Block>,
    budget: ErrorBudget,
    last_head: Option<B256>,
}

impl<C: RpcClient> Poller<C> {
    pub fn new(rpc: Arc<C>, network: Network, blocks_tx: mpsc::Sender<Block>) -> Self {
        Self {
            rpc,
            network,
            blocks_tx,
            budget: ErrorBudget::new(),
            last_head: None,
        }
    }

    /// Poll until the pipeline drops its receiver or the error budget is
    /// exhausted.
    pub async fn run(mut self) -> Result<(), SyncError> {
        tracing::info!(
            service = "sync",
            chain = %self.network.name,
            interval_ms = self.network.polling_interval.as_millis() as u64,
            "Poller started"
        );

        let mut ticker = tokio::time::interval(self.network.polling_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if self.blocks_tx.is_closed() {
                tracing::info!(service = "sync", "Pipeline dropped, poller stopping");
                return Ok(());
            }

            match self.rpc.get_latest_block().await {
                Ok(block) => {
                    self.budget.reset();
                    if self.last_head == Some(block.hash) {
                        tracing::trace!(
                            service = "sync",
                            block = block.number(),
                            "Head unchanged, skipping"
                        );
                        continue;
                    }
                    self.last_head = Some(block.hash);

                    let block_time = Utc
                        .timestamp_opt(block.timestamp() as i64, 0)
                        .single()
                        .unwrap_or_else(Utc::now);
                    tracing::debug!(
                        service = "sync",
                        block = block.number(),
                        hash = %block.hash,
                        %block_time,
                        "New head block"
                    );

                    if self.blocks_tx.send(block).await.is_err() {
                        tracing::info!(service = "sync", "Pipeline dropped, poller stopping");
                        return Ok(());
                    }
                }
                Err(err) => match self.budget.record_failure() {
                    Some(delay) => {
                        tracing::warn!(
                            service = "sync",
                            error = %err,
                            consecutive = self.budget.consecutive(),
                            delay_secs = delay.as_secs(),
                            "Poll failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(service = "sync", error = %err, "Poller retry budget exhausted");
                        return Err(SyncError::RetriesExhausted(self.budget.consecutive()));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{self, MockRpc};

    fn network() -> Network {
        Network {
            name: "testnet".to_string(),
            chain_id: 1,
            finality_block_count: 2,
            polling_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn repeated_heads_are_delivered_once() {
        let rpc = Arc::new(MockRpc::new());
        rpc.add_block(testing::block_at(101, 0));

        let (blocks_tx, mut blocks_rx) = mpsc::channel(8);
        let poller = Poller::new(rpc.clone(), network(), blocks_tx);
        let handle = tokio::spawn(poller.run());

        let first = blocks_rx.recv().await.unwrap();
        assert_eq!(first.number(), 101);

        // Let a few more polls of the same head pass, then advance it.
        tokio::time::sleep(Duration::from_millis(25)).await;
        rpc.add_block(testing::block_at(102, 0));
        let second = blocks_rx.recv().await.unwrap();
        assert_eq!(second.number(), 102);

        drop(blocks_rx);
        handle.await.unwrap().unwrap();
    }
}
