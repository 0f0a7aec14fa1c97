//! Total-order checkpoint keys for the downstream event stream.
//!
//! Every emitted event carries a [`Checkpoint`]; the tuple ordering (fields
//! in decreasing significance) is the canonical event order across chains,
//! and [`Checkpoint::encode`] produces a fixed-width decimal string whose
//! lexicographic order equals the tuple order, so encoded checkpoints can be
//! compared and range-scanned as plain strings.

use serde::{Deserialize, Serialize};

/// Sentinel transaction index used by block-level events so they sort after
/// every transaction-scoped event of the same block. Sixteen nines, the
/// largest value the encoding can carry.
pub const MAX_TRANSACTION_INDEX: u64 = 9_999_999_999_999_999;

/// Event kind ranks. The discriminant breaks ties between events of the
/// same transaction; distinct kinds guarantee distinct checkpoints for a
/// record that matches more than one filter class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Block = 1,
    Transaction = 2,
    Log = 3,
    Trace = 4,
    Transfer = 5,
}

impl EventKind {
    fn rank(self) -> u8 {
        self as u8
    }
}

/// A total-order key over all events across all chains.
///
/// Field order is significance order; the derived `Ord` is the canonical
/// event ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Checkpoint {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub event_kind: EventKind,
    pub event_index: u64,
}

impl Checkpoint {
    /// Encode to a fixed-width (75 character) zero-padded decimal string.
    ///
    /// Widths: timestamp 10, chain id 16, block number 16, transaction
    /// index 16, event kind 1, event index 16.
    pub fn encode(&self) -> String {
        format!(
            "{:010}{:016}{:016}{:016}{:01}{:016}",
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.transaction_index,
            self.event_kind.rank(),
            self.event_index,
        )
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}
