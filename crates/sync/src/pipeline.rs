//! The reorg-safe ingestion pipeline.
//!
//! A single consumer owns all sync state: the last finalized block, the
//! contiguous unfinalized chain above it, and the factory tracker. Head
//! blocks arrive over a channel; the consumer classifies each against the
//! current head and either ingests it, fills a gap, or rewinds a reorg.
//! Everything downstream observes is the ordered [`SyncEvent`] stream.

use std::cmp;
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use seine_common::error::SyncError;
use seine_common::types::{Block, LightBlock, Network, SyncEvent};
use seine_filters::Sources;

use crate::backoff::ErrorBudget;
use crate::events;
use crate::factory::FactoryTracker;
use crate::fetch;
use crate::rpc::RpcClient;

/// Upper bound on the block burst fetched while filling a gap. Anything
/// beyond it is trimmed; the next poll re-bootstraps from latest.
pub const MAX_QUEUED_BLOCKS: u64 = 25;

pub struct Pipeline<C: RpcClient> {
    network: Network,
    rpc: Arc<C>,
    sources: Sources,
    finalized: LightBlock,
    unfinalized: Vec<LightBlock>,
    tracker: FactoryTracker,
    /// Local work queue, drained before the channel is polled again.
    queue: VecDeque<Block>,
    blocks_rx: mpsc::Receiver<Block>,
    events_tx: mpsc::Sender<SyncEvent>,
    budget: ErrorBudget,
}

impl<C: RpcClient> Pipeline<C> {
    pub fn new(
        network: Network,
        rpc: Arc<C>,
        sources: Sources,
        finalized: LightBlock,
        blocks_rx: mpsc::Receiver<Block>,
        events_tx: mpsc::Sender<SyncEvent>,
    ) -> Self {
        let tracker = FactoryTracker::new(sources.factories.clone());
        Self {
            network,
            rpc,
            sources,
            finalized,
            unfinalized: Vec::new(),
            tracker,
            queue: VecDeque::new(),
            blocks_rx,
            events_tx,
            budget: ErrorBudget::new(),
        }
    }

    /// Consume blocks until the input channel closes, the downstream sink
    /// drops, or a fatal error occurs. Retryable errors clear the queue and
    /// back off; the next poll re-bootstraps from latest.
    pub async fn run(mut self) -> Result<(), SyncError> {
        tracing::info!(
            service = "sync",
            chain = %self.network.name,
            finalized = self.finalized.number,
            "Pipeline started"
        );

        loop {
            let block = match self.queue.pop_front() {
                Some(block) => block,
                None => match self.blocks_rx.recv().await {
                    Some(block) => block,
                    None => {
                        tracing::info!(service = "sync", "Block channel closed, pipeline stopping");
                        return Ok(());
                    }
                },
            };

            match self.process_block(block).await {
                Ok(()) => self.budget.reset(),
                Err(SyncError::ChannelClosed) => {
                    tracing::info!(service = "sync", "Event sink dropped, pipeline stopping");
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    self.clear_queue();
                    match self.budget.record_failure() {
                        Some(delay) => {
                            tracing::warn!(
                                service = "sync",
                                error = %err,
                                consecutive = self.budget.consecutive(),
                                delay_secs = delay.as_secs(),
                                "Retryable sync error, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(service = "sync", error = %err, "Retry budget exhausted");
                            return Err(SyncError::RetriesExhausted(self.budget.consecutive()));
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(service = "sync", error = %err, "Fatal sync error");
                    return Err(err);
                }
            }
        }
    }

    /// Classify one head block against the current head and dispatch.
    pub async fn process_block(&mut self, block: Block) -> Result<(), SyncError> {
        let head = self.head();
        let number = block.number();

        if block.hash == head.hash {
            tracing::debug!(service = "sync", block = number, "Duplicate head, skipping");
            return Ok(());
        }
        if number <= head.number {
            return self.handle_reorg(block).await;
        }
        if number > head.number + 1 {
            return self.fill_gap(head, block).await;
        }
        if block.parent_hash != head.hash {
            return self.handle_reorg(block).await;
        }
        self.ingest(block).await
    }

    /// The block every incoming head is classified against.
    fn head(&self) -> LightBlock {
        self.unfinalized.last().copied().unwrap_or(self.finalized)
    }

    pub fn finalized_block(&self) -> LightBlock {
        self.finalized
    }

    pub fn unfinalized_blocks(&self) -> &[LightBlock] {
        &self.unfinalized
    }

    pub fn tracker(&self) -> &FactoryTracker {
        &self.tracker
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        while self.blocks_rx.try_recv().is_ok() {}
    }

    async fn emit(&self, event: SyncEvent) -> Result<(), SyncError> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Happy path: the block extends the current head.
    async fn ingest(&mut self, block: Block) -> Result<(), SyncError> {
        let light = block.as_light();
        let mut fetched =
            fetch::fetch_block_event_data(self.rpc.as_ref(), &self.sources, block).await?;

        let factory_logs = std::mem::take(&mut fetched.factory_logs);
        self.tracker.record_block(light.hash, factory_logs);

        let built = events::build_events(
            self.network.chain_id,
            &self.sources,
            &fetched,
            &self.tracker,
        );
        self.unfinalized.push(light);

        tracing::info!(
            service = "sync",
            chain = %self.network.name,
            block = light.number,
            hash = %light.hash,
            events = built.events.len(),
            "Ingested block"
        );
        self.emit(SyncEvent::Block {
            block: light,
            matched_sources: built.matched_sources,
            events: built.events,
        })
        .await?;

        self.maybe_finalize(light).await
    }

    /// Promote the prefix up to `head - finality_block_count` once the head
    /// has pulled far enough ahead of the finalized block.
    async fn maybe_finalize(&mut self, head: LightBlock) -> Result<(), SyncError> {
        if head.number < self.finalized.number + 2 * self.network.finality_block_count {
            return Ok(());
        }
        let target = head.number - self.network.finality_block_count;
        let Some(position) = self.unfinalized.iter().position(|b| b.number == target) else {
            return Ok(());
        };

        let remaining = self.unfinalized.split_off(position + 1);
        let promoted = std::mem::replace(&mut self.unfinalized, remaining);
        let Some(new_finalized) = promoted.last().copied() else {
            return Ok(());
        };

        self.finalized = new_finalized;
        self.tracker.finalize(&promoted, &self.unfinalized);

        tracing::info!(
            service = "sync",
            chain = %self.network.name,
            block = new_finalized.number,
            hash = %new_finalized.hash,
            promoted = promoted.len(),
            "Finalized block range"
        );
        self.emit(SyncEvent::Finalize {
            block: new_finalized,
        })
        .await
    }

    /// The head jumped more than one block ahead: fetch the missing range
    /// in order (bounded by [`MAX_QUEUED_BLOCKS`]) and requeue the incoming
    /// block behind it.
    async fn fill_gap(&mut self, head: LightBlock, incoming: Block) -> Result<(), SyncError> {
        let start = head.number + 1;
        let end = cmp::min(incoming.number(), start + MAX_QUEUED_BLOCKS);
        tracing::info!(
            service = "sync",
            chain = %self.network.name,
            head = head.number,
            incoming = incoming.number(),
            fetching = end - start,
            "Gap detected, filling missing range"
        );

        let mut missing = Vec::with_capacity((end - start) as usize);
        for number in start..end {
            let block = self.rpc.get_block_by_number(number).await?.ok_or_else(|| {
                SyncError::InconsistentResponse(format!(
                    "block {number} disappeared while filling a gap"
                ))
            })?;
            missing.push(block);
        }

        self.clear_queue();
        self.queue.extend(missing);
        self.queue.push_back(incoming);
        Ok(())
    }

    /// The incoming block does not extend the head: evict everything at or
    /// above its height, then walk parent hashes back to the common
    /// ancestor. Running out of unfinalized blocks means the fork crosses
    /// the finalized block, which is unrecoverable.
    async fn handle_reorg(&mut self, incoming: Block) -> Result<(), SyncError> {
        let incoming = incoming.as_light();
        let split = self
            .unfinalized
            .partition_point(|b| b.number < incoming.number);
        let mut reorged = self.unfinalized.split_off(split);

        let mut cursor = incoming;
        let common_ancestor = loop {
            let head = self.head();
            if cursor.parent_hash == head.hash {
                break head;
            }
            if self.unfinalized.is_empty() {
                tracing::error!(
                    service = "sync",
                    chain = %self.network.name,
                    block = incoming.number,
                    hash = %incoming.hash,
                    finalized = self.finalized.number,
                    "Reorg does not reconnect above the finalized block"
                );
                return Err(SyncError::UnrecoverableReorg {
                    block_number: incoming.number,
                    block_hash: incoming.hash,
                    finalized_number: self.finalized.number,
                    finalized_hash: self.finalized.hash,
                });
            }

            let parent = self
                .rpc
                .get_block_by_hash(cursor.parent_hash)
                .await?
                .ok_or_else(|| {
                    SyncError::InconsistentResponse(format!(
                        "parent block {} missing during reorg walk",
                        cursor.parent_hash
                    ))
                })?;
            cursor = parent.as_light();
            if let Some(evicted) = self.unfinalized.pop() {
                reorged.push(evicted);
            }
        };

        reorged.sort_by_key(|b| b.number);
        self.tracker.rewind(&reorged, &self.unfinalized);

        tracing::warn!(
            service = "sync",
            chain = %self.network.name,
            common_ancestor = common_ancestor.number,
            depth = reorged.len(),
            "Reorg detected, rewound to common ancestor"
        );
        self.emit(SyncEvent::Reorg {
            common_ancestor,
            reorged_blocks: reorged,
        })
        .await?;

        self.clear_queue();
        Ok(())
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
            polling_interval: Duration::from_millis(10),
        }
    }

    fn pipeline(
        rpc: Arc<MockRpc>,
        finalized: LightBlock,
    ) -> (
        Pipeline<MockRpc>,
        mpsc::Sender<Block>,
        mpsc::Receiver<SyncEvent>,
    ) {
        let (blocks_tx, blocks_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let pipeline = Pipeline::new(
            network(),
            rpc,
            Sources::new(vec![]),
            finalized,
            blocks_rx,
            events_tx,
        );
        (pipeline, blocks_tx, events_rx)
    }

    #[tokio::test]
    async fn run_drains_channel_and_stops_on_close() {
        let rpc = Arc::new(MockRpc::new());
        let finalized = testing::block_at(100, 0).as_light();
        let blocks = testing::chain_of(101, 3, 0, finalized.hash);
        rpc.add_blocks(blocks.clone());

        let (pipeline, blocks_tx, mut events_rx) = pipeline(rpc, finalized);
        let handle = tokio::spawn(pipeline.run());

        for block in blocks {
            blocks_tx.send(block).await.unwrap();
        }
        drop(blocks_tx);
        handle.await.unwrap().unwrap();

        let mut numbers = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            if let SyncEvent::Block { block, .. } = event {
                numbers.push(block.number);
            }
        }
        assert_eq!(numbers, vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn retryable_error_backs_off_and_recovers() {
        let rpc = Arc::new(MockRpc::new());
        let finalized = testing::block_at(100, 0).as_light();
        let block = testing::block_with_parent(101, 0, finalized.hash);
        rpc.add_block(block.clone());

        let (mut pipeline, _blocks_tx, mut events_rx) = pipeline(rpc.clone(), finalized);

        // Gap-fill path needs an RPC call, which fails once.
        rpc.fail_next(1);
        let far = testing::block_with_parent(103, 0, testing::block_hash(102, 0));
        let err = pipeline.process_block(far).await.unwrap_err();
        assert!(err.is_retryable());

        // A later, healthy delivery still ingests.
        pipeline.process_block(block).await.unwrap();
        assert_eq!(pipeline.unfinalized_blocks().len(), 1);
        assert!(matches!(
            events_rx.try_recv().unwrap(),
            SyncEvent::Block { .. }
        ));
    }
}
