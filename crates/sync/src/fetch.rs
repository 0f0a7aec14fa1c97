//! Per-block data retrieval.
//!
//! Given a full head block, fetch the logs, traces, and receipts the
//! configured sources require, pre-filtered down to a superset of what will
//! match (factory references count as wildcards here; the strict pass with
//! child-address membership happens at ingest). Every response is checked
//! for internal consistency; a failed check is a retryable error since it
//! usually means the RPC node is lagging near the tip.

use std::collections::{HashMap, HashSet};

use alloy::primitives::{B256, Bloom};

use seine_common::error::SyncError;
use seine_common::types::{
    Block, BlockTrace, Log, TraceFrame, TraceResult, Transaction, TransactionReceipt,
};
use seine_filters::{Filter, Sources, bloom, matcher};

use crate::rpc::RpcClient;

/// Everything downstream needs from one block.
#[derive(Debug)]
pub struct FetchedBlock {
    /// The block with its heavy transaction array moved out, so dropping
    /// this struct reclaims the raw response.
    pub block: Block,
    pub logs: Vec<Log>,
    /// Logs matching a factory announcement, recorded per block by the
    /// factory tracker.
    pub factory_logs: Vec<Log>,
    pub traces: Vec<BlockTrace>,
    /// Transactions required by a matched record or a transaction filter.
    pub transactions: Vec<Transaction>,
    /// Receipts for transactions a `include_reverted = false` filter needs,
    /// keyed by transaction hash.
    pub receipts: HashMap<B256, TransactionReceipt>,
}

pub async fn fetch_block_event_data<C: RpcClient + ?Sized>(
    rpc: &C,
    sources: &Sources,
    mut block: Block,
) -> Result<FetchedBlock, SyncError> {
    let number = block.number();
    let block_transactions = std::mem::take(&mut block.transactions);

    let logs = if should_fetch_logs(sources, &block.logs_bloom) {
        let logs = rpc.get_logs(block.hash).await?;
        if !block.logs_bloom.is_zero() && logs.is_empty() {
            return Err(SyncError::InconsistentResponse(format!(
                "block {number} has a non-zero logs bloom but eth_getLogs returned nothing"
            )));
        }
        for log in &logs {
            if log.block_hash != Some(block.hash) {
                return Err(SyncError::InconsistentResponse(format!(
                    "log {} of block {number} carries block hash {:?}, expected {}",
                    log.log_index(),
                    log.block_hash,
                    block.hash
                )));
            }
        }
        logs
    } else {
        Vec::new()
    };

    let traces = if sources.needs_traces() {
        let results = rpc.trace_block_by_hash(block.hash).await?;
        if !block_transactions.is_empty() && results.is_empty() {
            return Err(SyncError::InconsistentResponse(format!(
                "block {number} has {} transactions but no traces",
                block_transactions.len()
            )));
        }
        let tx_index_by_hash: HashMap<B256, u64> = block_transactions
            .iter()
            .map(|tx| (tx.hash, tx.transaction_index()))
            .collect();
        flatten_traces(number, results, &tx_index_by_hash)?
    } else {
        Vec::new()
    };

    let factory_logs: Vec<Log> = logs
        .iter()
        .filter(|log| {
            sources
                .factories
                .iter()
                .any(|factory| matcher::factory_matches(factory, log))
        })
        .cloned()
        .collect();

    // Weak pre-filter: collect the transaction hashes of every record that
    // could match once child addresses are known.
    let mut required: HashSet<B256> = HashSet::new();
    for filter in &sources.filters {
        match filter {
            Filter::Log(f) => {
                for log in &logs {
                    if matcher::log_matches(f, number, log, None)
                        && let Some(tx_hash) = log.transaction_hash
                    {
                        required.insert(tx_hash);
                    }
                }
            }
            Filter::Trace(f) => {
                for trace in &traces {
                    if matcher::trace_matches(f, number, trace, None) {
                        required.insert(trace.transaction_hash);
                    }
                }
            }
            Filter::Transfer(f) => {
                for trace in &traces {
                    if matcher::transfer_matches(f, number, trace, None) {
                        required.insert(trace.transaction_hash);
                    }
                }
            }
            Filter::Transaction(_) | Filter::Block(_) => {}
        }
    }

    let matches_transaction_filter = |tx: &Transaction| {
        sources.filters.iter().any(|filter| match filter {
            Filter::Transaction(f) => matcher::transaction_matches(f, number, tx, None),
            _ => false,
        })
    };
    let transactions: Vec<Transaction> = block_transactions
        .into_iter()
        .filter(|tx| required.contains(&tx.hash) || matches_transaction_filter(tx))
        .collect();

    let needs_receipt = |tx: &Transaction| {
        sources.filters.iter().any(|filter| match filter {
            Filter::Transaction(f) => {
                !f.include_reverted && matcher::transaction_matches(f, number, tx, None)
            }
            _ => false,
        })
    };
    let mut receipts = HashMap::new();
    for tx in transactions.iter().filter(|tx| needs_receipt(tx)) {
        let receipt = rpc.get_transaction_receipt(tx.hash).await?.ok_or_else(|| {
            SyncError::InconsistentResponse(format!(
                "missing receipt for transaction {} of block {number}",
                tx.hash
            ))
        })?;
        if receipt.block_hash.is_some_and(|hash| hash != block.hash) {
            return Err(SyncError::InconsistentResponse(format!(
                "receipt for transaction {} carries block hash {:?}, expected {}",
                tx.hash, receipt.block_hash, block.hash
            )));
        }
        receipts.insert(tx.hash, receipt);
    }

    tracing::debug!(
        service = "sync",
        block = number,
        logs = logs.len(),
        factory_logs = factory_logs.len(),
        traces = traces.len(),
        transactions = transactions.len(),
        receipts = receipts.len(),
        "Fetched block event data"
    );

    Ok(FetchedBlock {
        block,
        logs,
        factory_logs,
        traces,
        transactions,
        receipts,
    })
}

/// Whether `eth_getLogs` can be skipped for a block with this bloom.
/// Skipping is only allowed when the bloom is non-zero and rules out every
/// log source; false negatives are forbidden.
fn should_fetch_logs(sources: &Sources, logs_bloom: &Bloom) -> bool {
    if !sources.needs_logs() {
        return false;
    }
    if logs_bloom.is_zero() {
        return true;
    }
    sources.filters.iter().any(|filter| match filter {
        Filter::Log(f) => bloom::log_filter_may_match(logs_bloom, f),
        _ => false,
    }) || sources
        .factories
        .iter()
        .any(|factory| bloom::factory_may_match(logs_bloom, factory))
}

/// Flatten call-tracer frame trees into depth-first ordinals per
/// transaction, validating that every trace belongs to a block transaction.
fn flatten_traces(
    block_number: u64,
    results: Vec<TraceResult>,
    tx_index_by_hash: &HashMap<B256, u64>,
) -> Result<Vec<BlockTrace>, SyncError> {
    let mut traces = Vec::new();
    for result in results {
        let Some(&transaction_index) = tx_index_by_hash.get(&result.tx_hash) else {
            return Err(SyncError::InconsistentResponse(format!(
                "trace for transaction {} absent from block {block_number}",
                result.tx_hash
            )));
        };
        let mut ordinal = 0u32;
        if let Some(frame) = result.result {
            flatten_frame(frame, result.tx_hash, transaction_index, &mut ordinal, &mut traces);
        }
    }
    Ok(traces)
}

fn flatten_frame(
    frame: TraceFrame,
    transaction_hash: B256,
    transaction_index: u64,
    ordinal: &mut u32,
    out: &mut Vec<BlockTrace>,
) {
    let TraceFrame {
        call_type,
        from,
        to,
        input,
        value,
        error: _,
        calls,
    } = frame;
    out.push(BlockTrace {
        transaction_hash,
        transaction_index,
        trace_index: *ordinal,
        call_type,
        from,
        to,
        input,
        value,
    });
    *ordinal += 1;
    for call in calls {
        flatten_frame(call, transaction_hash, transaction_index, ordinal, out);
    }
}
