//! Real-time chain synchronization core.
//!
//! The [`poller`] fetches head blocks and feeds the [`pipeline`], which
//! detects gaps and reorgs, keeps the unfinalized chain contiguous, tracks
//! factory child addresses, and emits an ordered [`SyncEvent`] stream.
//!
//! [`SyncEvent`]: seine_common::types::SyncEvent

pub mod backoff;
pub mod events;
pub mod factory;
pub mod fetch;
pub mod pipeline;
pub mod poller;
pub mod rpc;
pub mod testing;
