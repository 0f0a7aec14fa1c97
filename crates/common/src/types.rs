use std::collections::BTreeSet;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bloom, Bytes, U64, U256};
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;

/// Per-chain sync configuration.
#[derive(Debug, Clone)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    /// Depth beyond which reorgs are assumed impossible on this chain.
    pub finality_block_count: u64,
    pub polling_interval: Duration,
}

/// The minimal block record retained for each unfinalized block.
///
/// Parent links are by hash, so a contiguous chain is checkable without
/// holding any heavy block data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightBlock {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
}

/// A block as returned by `eth_getBlockBy*` with full transaction objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: U64,
    pub timestamp: U64,
    pub logs_bloom: Bloom,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.number.to::<u64>()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.to::<u64>()
    }

    pub fn as_light(&self) -> LightBlock {
        LightBlock {
            number: self.number(),
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp(),
        }
    }
}

/// A transaction as embedded in a full block response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract-creation transactions.
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub value: U256,
    pub transaction_index: U64,
    #[serde(default)]
    pub block_hash: Option<B256>,
}

impl Transaction {
    pub fn transaction_index(&self) -> u64 {
        self.transaction_index.to::<u64>()
    }
}

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    pub transaction_index: U64,
    pub log_index: U64,
    #[serde(default)]
    pub removed: bool,
}

impl Log {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }

    pub fn transaction_index(&self) -> u64 {
        self.transaction_index.to::<u64>()
    }

    pub fn log_index(&self) -> u64 {
        self.log_index.to::<u64>()
    }
}

/// A transaction receipt, fetched only when a filter needs revert status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub status: Option<U64>,
}

impl TransactionReceipt {
    /// Post-Byzantium receipts carry an explicit status; a missing status is
    /// treated as success.
    pub fn is_success(&self) -> bool {
        self.status.is_none_or(|s| s != U64::ZERO)
    }
}

/// Call frame kinds produced by the `callTracer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallType {
    Call,
    StaticCall,
    DelegateCall,
    CallCode,
    Create,
    Create2,
    SelfDestruct,
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallType::Call => write!(f, "call"),
            CallType::StaticCall => write!(f, "staticcall"),
            CallType::DelegateCall => write!(f, "delegatecall"),
            CallType::CallCode => write!(f, "callcode"),
            CallType::Create => write!(f, "create"),
            CallType::Create2 => write!(f, "create2"),
            CallType::SelfDestruct => write!(f, "selfdestruct"),
        }
    }
}

/// One nested frame of a `debug_traceBlockByHash` call-tracer response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFrame {
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub calls: Vec<TraceFrame>,
}

/// One per-transaction entry of a `debug_traceBlockByHash` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    pub tx_hash: B256,
    #[serde(default)]
    pub result: Option<TraceFrame>,
}

/// A call frame flattened out of the tracer's tree, with a deterministic
/// depth-first ordinal within its transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTrace {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub trace_index: u32,
    pub call_type: CallType,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: Option<U256>,
}

/// The payload of a single matched record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventData {
    Log {
        log: Log,
    },
    Trace {
        trace: BlockTrace,
    },
    Transfer {
        trace: BlockTrace,
    },
    Transaction {
        transaction: Transaction,
        /// Present only when a matching filter demanded revert status.
        receipt: Option<TransactionReceipt>,
    },
    Block {
        block: LightBlock,
    },
}

/// One matched record, ready for the downstream sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub chain_id: u64,
    /// Position of the matching filter in the user's source list.
    pub source_index: usize,
    pub checkpoint: Checkpoint,
    pub data: EventData,
}

/// The downstream event stream emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    Block {
        block: LightBlock,
        matched_sources: BTreeSet<usize>,
        events: Vec<RawEvent>,
    },
    Finalize {
        block: LightBlock,
    },
    Reorg {
        common_ancestor: LightBlock,
        reorged_blocks: Vec<LightBlock>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_deserializes_from_rpc_shape() {
        let raw = serde_json::json!({
            "hash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "parentHash": "0x00000000000000000000000000000000000000000000000000000000000000bb",
            "number": "0x65",
            "timestamp": "0x5f5e100",
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "transactions": [{
                "hash": "0x00000000000000000000000000000000000000000000000000000000000000cc",
                "from": "0x1111111111111111111111111111111111111111",
                "to": null,
                "input": "0x",
                "value": "0x0",
                "transactionIndex": "0x0"
            }]
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.number(), 0x65);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].to.is_none());
    }

    #[test]
    fn trace_frame_deserializes_nested_calls() {
        let raw = serde_json::json!({
            "type": "CALL",
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0x2222222222222222222222222222222222222222",
            "input": "0xa9059cbb",
            "value": "0x1",
            "calls": [{
                "type": "STATICCALL",
                "from": "0x2222222222222222222222222222222222222222",
                "to": "0x3333333333333333333333333333333333333333",
                "input": "0x"
            }]
        });
        let frame: TraceFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.call_type, CallType::Call);
        assert_eq!(frame.calls.len(), 1);
        assert_eq!(frame.calls[0].call_type, CallType::StaticCall);
        assert!(frame.calls[0].value.is_none());
    }

    #[test]
    fn receipt_status_defaults_to_success() {
        let ok = TransactionReceipt {
            transaction_hash: B256::ZERO,
            block_hash: None,
            status: Some(U64::from(1)),
        };
        let reverted = TransactionReceipt {
            status: Some(U64::ZERO),
            ..ok.clone()
        };
        let pre_byzantium = TransactionReceipt {
            status: None,
            ..ok.clone()
        };
        assert!(ok.is_success());
        assert!(!reverted.is_success());
        assert!(pre_byzantium.is_success());
    }
}
