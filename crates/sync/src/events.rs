//! Converts a fetched block into the ordered event sequence.
//!
//! This is the strict matching pass: factory-referenced address positions
//! are resolved against the tracker's child sets. Output is sorted by
//! checkpoint, which within a block means
//! `(transaction_index, kind, event_index)`.

use std::collections::BTreeSet;

use seine_common::checkpoint::{Checkpoint, EventKind, MAX_TRANSACTION_INDEX};
use seine_common::types::{EventData, LightBlock, RawEvent};
use seine_filters::{ChildAddressLookup, Filter, Sources, matcher};

use crate::fetch::FetchedBlock;

pub struct BuiltEvents {
    /// Indexes into the source list of every filter that matched at least
    /// one record.
    pub matched_sources: BTreeSet<usize>,
    /// All matched records, checkpoint-ascending.
    pub events: Vec<RawEvent>,
}

pub fn build_events(
    chain_id: u64,
    sources: &Sources,
    fetched: &FetchedBlock,
    children: &dyn ChildAddressLookup,
) -> BuiltEvents {
    let block = fetched.block.as_light();
    let mut matched_sources = BTreeSet::new();
    let mut events = Vec::new();

    for (source_index, filter) in sources.filters.iter().enumerate() {
        // (transaction index, event kind, event index, payload) per match.
        let mut records: Vec<(u64, EventKind, u64, EventData)> = Vec::new();
        match filter {
            Filter::Log(f) => {
                for log in &fetched.logs {
                    if matcher::log_matches(f, block.number, log, Some(children)) {
                        records.push((
                            log.transaction_index(),
                            EventKind::Log,
                            log.log_index(),
                            EventData::Log { log: log.clone() },
                        ));
                    }
                }
            }
            Filter::Trace(f) => {
                for trace in &fetched.traces {
                    if matcher::trace_matches(f, block.number, trace, Some(children)) {
                        records.push((
                            trace.transaction_index,
                            EventKind::Trace,
                            trace.trace_index as u64,
                            EventData::Trace { trace: trace.clone() },
                        ));
                    }
                }
            }
            Filter::Transfer(f) => {
                for trace in &fetched.traces {
                    if matcher::transfer_matches(f, block.number, trace, Some(children)) {
                        records.push((
                            trace.transaction_index,
                            EventKind::Transfer,
                            trace.trace_index as u64,
                            EventData::Transfer { trace: trace.clone() },
                        ));
                    }
                }
            }
            Filter::Transaction(f) => {
                for transaction in &fetched.transactions {
                    if matcher::transaction_matches(f, block.number, transaction, Some(children)) {
                        records.push((
                            transaction.transaction_index(),
                            EventKind::Transaction,
                            0,
                            EventData::Transaction {
                                transaction: transaction.clone(),
                                receipt: fetched.receipts.get(&transaction.hash).cloned(),
                            },
                        ));
                    }
                }
            }
            Filter::Block(f) => {
                if matcher::block_matches(f, block.number) {
                    records.push((
                        MAX_TRANSACTION_INDEX,
                        EventKind::Block,
                        0,
                        EventData::Block { block },
                    ));
                }
            }
        }

        for (transaction_index, kind, event_index, data) in records {
            matched_sources.insert(source_index);
            events.push(RawEvent {
                chain_id,
                source_index,
                checkpoint: checkpoint_for(chain_id, &block, transaction_index, kind, event_index),
                data,
            });
        }
    }

    events.sort_by_key(|event| event.checkpoint);

    BuiltEvents {
        matched_sources,
        events,
    }
}

fn checkpoint_for(
    chain_id: u64,
    block: &LightBlock,
    transaction_index: u64,
    kind: EventKind,
    event_index: u64,
) -> Checkpoint {
    Checkpoint {
        block_timestamp: block.timestamp,
        chain_id,
        block_number: block.number,
        transaction_index,
        event_kind: kind,
        event_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use alloy::primitives::{Address, address};

    use seine_filters::{
        AddressSelector, BlockFilter, Factory, LogFilter, TransactionFilter, ValueOrArray,
        ChildLocation,
    };

    use crate::testing;

    const WATCHED: Address = address!("00000000000000000000000000000000000000aa");
    const CHILD: Address = address!("00000000000000000000000000000000000000c1");

    fn log_filter(address: Option<AddressSelector>) -> Filter {
        Filter::Log(LogFilter {
            chain_id: 1,
            from_block: None,
            to_block: None,
            address,
            topic0: None,
            topic1: None,
            topic2: None,
            topic3: None,
        })
    }

    fn every_block() -> Filter {
        Filter::Block(BlockFilter {
            chain_id: 1,
            from_block: None,
            to_block: None,
            interval: 1,
            offset: 0,
        })
    }

    fn fetched(block_number: u64) -> FetchedBlock {
        FetchedBlock {
            block: testing::block_at(block_number, 0),
            logs: Vec::new(),
            factory_logs: Vec::new(),
            traces: Vec::new(),
            transactions: Vec::new(),
            receipts: HashMap::new(),
        }
    }

    fn no_children() -> HashMap<Factory, std::collections::HashSet<Address>> {
        HashMap::new()
    }

    #[test]
    fn events_sort_by_checkpoint_with_block_last() {
        let sources = Sources::new(vec![
            every_block(),
            log_filter(Some(AddressSelector::Single(WATCHED))),
            Filter::Transaction(TransactionFilter {
                chain_id: 1,
                from_block: None,
                to_block: None,
                from_address: Some(AddressSelector::Single(WATCHED)),
                to_address: None,
                include_reverted: true,
            }),
        ]);

        let mut data = fetched(101);
        let tx = testing::transaction(0, WATCHED, Some(CHILD));
        let mut log = testing::log_in_block(data.block.hash, 101, WATCHED, vec![], 3);
        log.transaction_hash = Some(tx.hash);
        data.transactions = vec![tx];
        data.logs = vec![log];

        let built = build_events(1, &sources, &data, &no_children());

        assert_eq!(built.matched_sources, BTreeSet::from([0, 1, 2]));
        let kinds: Vec<EventKind> = built
            .events
            .iter()
            .map(|event| event.checkpoint.event_kind)
            .collect();
        // Transaction outranks its log; the block sentinel sorts last.
        assert_eq!(
            kinds,
            vec![EventKind::Transaction, EventKind::Log, EventKind::Block]
        );
        let checkpoints: Vec<_> = built.events.iter().map(|e| e.checkpoint).collect();
        let mut sorted = checkpoints.clone();
        sorted.sort();
        assert_eq!(checkpoints, sorted);
        assert_eq!(
            built.events.last().unwrap().checkpoint.transaction_index,
            MAX_TRANSACTION_INDEX
        );
    }

    #[test]
    fn factory_membership_gates_log_events() {
        let factory = Factory {
            address: ValueOrArray::Value(WATCHED),
            event_selector: alloy::primitives::B256::repeat_byte(0xab),
            child_location: ChildLocation::Topic(1),
        };
        let sources = Sources::new(vec![log_filter(Some(AddressSelector::Factory(
            factory.clone(),
        )))]);

        let mut data = fetched(101);
        data.logs = vec![testing::log_in_block(data.block.hash, 101, CHILD, vec![], 0)];

        let empty = no_children();
        let built = build_events(1, &sources, &data, &empty);
        assert!(built.events.is_empty());

        let children =
            HashMap::from([(factory, std::collections::HashSet::from([CHILD]))]);
        let built = build_events(1, &sources, &data, &children);
        assert_eq!(built.events.len(), 1);
        assert_eq!(built.matched_sources, BTreeSet::from([0]));
    }

    #[test]
    fn transaction_events_carry_their_receipt() {
        let sources = Sources::new(vec![Filter::Transaction(TransactionFilter {
            chain_id: 1,
            from_block: None,
            to_block: None,
            from_address: Some(AddressSelector::Single(WATCHED)),
            to_address: None,
            include_reverted: false,
        })]);

        let mut data = fetched(101);
        let tx = testing::transaction(0, WATCHED, Some(CHILD));
        let receipt = seine_common::types::TransactionReceipt {
            transaction_hash: tx.hash,
            block_hash: Some(data.block.hash),
            status: Some(alloy::primitives::U64::from(1)),
        };
        data.receipts.insert(tx.hash, receipt.clone());
        data.transactions = vec![tx];

        let built = build_events(1, &sources, &data, &no_children());
        assert_eq!(built.events.len(), 1);
        let EventData::Transaction { receipt: attached, .. } = &built.events[0].data else {
            panic!("expected a transaction event");
        };
        assert_eq!(attached.as_ref(), Some(&receipt));
    }
}
