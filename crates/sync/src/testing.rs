//! In-memory RPC double and fixture builders shared by the unit and
//! integration test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256, Bloom, Bytes, U64, U256};
use async_trait::async_trait;

use seine_common::error::SyncError;
use seine_common::types::{
    Block, CallType, Log, TraceFrame, TraceResult, Transaction, TransactionReceipt,
};

use crate::rpc::RpcClient;

/// Deterministic 32-byte value from a seed.
pub fn hash(seed: u64) -> B256 {
    B256::new(U256::from(seed).to_be_bytes())
}

/// Deterministic block hash for `(number, fork)`. Fork 0 is the canonical
/// chain; other forks yield sibling hashes at the same height.
pub fn block_hash(number: u64, fork: u64) -> B256 {
    hash(1 + number * 1_000 + fork)
}

/// An empty block at `number` on `fork`, parent-linked to `parent`.
pub fn block_with_parent(number: u64, fork: u64, parent: B256) -> Block {
    Block {
        hash: block_hash(number, fork),
        parent_hash: parent,
        number: U64::from(number),
        timestamp: U64::from(1_700_000_000 + number),
        logs_bloom: Bloom::ZERO,
        transactions: Vec::new(),
    }
}

/// An empty block at `number` on `fork`, parent-linked within the fork.
pub fn block_at(number: u64, fork: u64) -> Block {
    block_with_parent(number, fork, block_hash(number - 1, fork))
}

/// `count` consecutive blocks starting at `start`, the first parent-linked
/// to `parent`.
pub fn chain_of(start: u64, count: u64, fork: u64, parent: B256) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count as usize);
    let mut parent = parent;
    for number in start..start + count {
        let block = block_with_parent(number, fork, parent);
        parent = block.hash;
        blocks.push(block);
    }
    blocks
}

pub fn transaction(index: u64, from: Address, to: Option<Address>) -> Transaction {
    Transaction {
        hash: hash(0x7700_0000 + index),
        from,
        to,
        input: Bytes::new(),
        value: U256::ZERO,
        transaction_index: U64::from(index),
        block_hash: None,
    }
}

pub fn log_in_block(
    block_hash: B256,
    block_number: u64,
    address: Address,
    topics: Vec<B256>,
    log_index: u64,
) -> Log {
    Log {
        address,
        topics,
        data: Bytes::new(),
        block_hash: Some(block_hash),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(hash(0x8800_0000 + log_index)),
        transaction_index: U64::ZERO,
        log_index: U64::from(log_index),
        removed: false,
    }
}

/// Left-pad an address into a 32-byte topic (EVM indexed address encoding).
pub fn address_topic(address: Address) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[12..32].copy_from_slice(address.as_slice());
    B256::from(bytes)
}

pub fn call_frame(
    call_type: CallType,
    from: Address,
    to: Option<Address>,
    input: Bytes,
    value: Option<U256>,
    calls: Vec<TraceFrame>,
) -> TraceFrame {
    TraceFrame {
        call_type,
        from,
        to,
        input,
        value,
        error: None,
        calls,
    }
}

pub fn trace_result(tx_hash: B256, frame: TraceFrame) -> TraceResult {
    TraceResult {
        tx_hash,
        result: Some(frame),
    }
}

#[derive(Default)]
struct MockState {
    blocks_by_number: HashMap<u64, Block>,
    blocks_by_hash: HashMap<B256, Block>,
    logs: HashMap<B256, Vec<Log>>,
    traces: HashMap<B256, Vec<TraceResult>>,
    receipts: HashMap<B256, TransactionReceipt>,
    latest: Option<Block>,
    calls: Vec<String>,
    fail_next: usize,
}

/// In-memory [`RpcClient`] with canned responses and a call journal.
#[derive(Default)]
pub struct MockRpc {
    state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block by number and hash; the highest number becomes the
    /// `latest` head. Re-adding a number replaces the canonical entry, the
    /// way a reorged node would answer.
    pub fn add_block(&self, block: Block) {
        let mut state = self.state.lock().unwrap();
        if state
            .latest
            .as_ref()
            .is_none_or(|latest| block.number() >= latest.number())
        {
            state.latest = Some(block.clone());
        }
        state.blocks_by_number.insert(block.number(), block.clone());
        state.blocks_by_hash.insert(block.hash, block);
    }

    pub fn add_blocks(&self, blocks: impl IntoIterator<Item = Block>) {
        for block in blocks {
            self.add_block(block);
        }
    }

    pub fn set_logs(&self, block_hash: B256, logs: Vec<Log>) {
        self.state.lock().unwrap().logs.insert(block_hash, logs);
    }

    pub fn set_traces(&self, block_hash: B256, traces: Vec<TraceResult>) {
        self.state.lock().unwrap().traces.insert(block_hash, traces);
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.transaction_hash, receipt);
    }

    /// Fail the next `count` requests with a transient transport error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// The journal of every request served so far.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn begin(&self, call: String) -> Result<std::sync::MutexGuard<'_, MockState>, SyncError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SyncError::Rpc("injected transport failure".to_string()));
        }
        state.calls.push(call);
        Ok(state)
    }
}

#[async_trait]
impl RpcClient for MockRpc {
    async fn get_latest_block(&self) -> Result<Block, SyncError> {
        let state = self.begin("eth_getBlockByNumber(latest)".to_string())?;
        state
            .latest
            .clone()
            .ok_or_else(|| SyncError::Rpc("mock has no latest block".to_string()))
    }

    async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, SyncError> {
        let state = self.begin(format!("eth_getBlockByNumber({number})"))?;
        Ok(state.blocks_by_number.get(&number).cloned())
    }

    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<Block>, SyncError> {
        let state = self.begin(format!("eth_getBlockByHash({hash})"))?;
        Ok(state.blocks_by_hash.get(&hash).cloned())
    }

    async fn get_logs(&self, block_hash: B256) -> Result<Vec<Log>, SyncError> {
        let state = self.begin(format!("eth_getLogs({block_hash})"))?;
        Ok(state.logs.get(&block_hash).cloned().unwrap_or_default())
    }

    async fn trace_block_by_hash(
        &self,
        block_hash: B256,
    ) -> Result<Vec<TraceResult>, SyncError> {
        let state = self.begin(format!("debug_traceBlockByHash({block_hash})"))?;
        Ok(state.traces.get(&block_hash).cloned().unwrap_or_default())
    }

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, SyncError> {
        let state = self.begin(format!("eth_getTransactionReceipt({hash})"))?;
        Ok(state.receipts.get(&hash).cloned())
    }
}
