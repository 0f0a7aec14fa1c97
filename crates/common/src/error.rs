use alloy::primitives::B256;
use thiserror::Error;

/// Errors surfaced by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level RPC failure. Retried with backoff.
    #[error("rpc request failed: {0}")]
    Rpc(String),

    /// The RPC node returned data that fails a consistency check, e.g. a
    /// mismatched block hash or empty logs against a non-zero bloom. Usually
    /// node lag near the tip; retried with backoff.
    #[error("inconsistent rpc response: {0}")]
    InconsistentResponse(String),

    /// The reorg walk-back exhausted the unfinalized list without finding a
    /// common ancestor. Fatal, never retried.
    #[error(
        "unrecoverable reorg: block {block_number} ({block_hash}) does not reconnect to \
         finalized block {finalized_number} ({finalized_hash})"
    )]
    UnrecoverableReorg {
        block_number: u64,
        block_hash: B256,
        finalized_number: u64,
        finalized_hash: B256,
    },

    /// Too many consecutive retryable failures. Fatal.
    #[error("giving up after {0} consecutive errors")]
    RetriesExhausted(usize),

    /// The downstream event channel closed. Graceful shutdown, not a fault.
    #[error("event channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Whether the supervisor should back off and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Rpc(_) | SyncError::InconsistentResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SyncError::Rpc("timeout".into()).is_retryable());
        assert!(SyncError::InconsistentResponse("lag".into()).is_retryable());
        assert!(!SyncError::RetriesExhausted(14).is_retryable());
        assert!(!SyncError::ChannelClosed.is_retryable());
        assert!(
            !SyncError::UnrecoverableReorg {
                block_number: 101,
                block_hash: B256::ZERO,
                finalized_number: 100,
                finalized_hash: B256::ZERO,
            }
            .is_retryable()
        );
    }
}
