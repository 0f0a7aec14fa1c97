//! Pure per-record match predicates.
//!
//! No I/O and no logging; callers decide what to do with a match. Address
//! and hash comparisons operate on alloy byte types, so hex-case differences
//! cannot leak in. Factory-referenced address positions take an optional
//! [`ChildAddressLookup`]: `None` is the weak mode used while pre-filtering
//! (the factory reference matches any candidate), `Some` is the strict mode
//! used at ingest.

use alloy::primitives::Address;

use seine_common::types::{BlockTrace, Log, Transaction};

use crate::{
    AddressSelector, BlockFilter, ChildAddressLookup, ChildLocation, Factory, LogFilter,
    TraceFilter, TransactionFilter, TransferFilter, ValueOrArray,
};

/// `[from_block, to_block]`, inclusive at both ends.
fn in_range(from_block: Option<u64>, to_block: Option<u64>, number: u64) -> bool {
    number >= from_block.unwrap_or(0) && number <= to_block.unwrap_or(u64::MAX)
}

/// An absent constraint matches anything; a missing candidate never matches
/// a non-absent constraint.
fn value_matches<T: PartialEq>(
    constraint: Option<&ValueOrArray<T>>,
    candidate: Option<&T>,
) -> bool {
    match constraint {
        None => true,
        Some(constraint) => candidate.is_some_and(|value| constraint.contains(value)),
    }
}

fn address_matches(
    selector: Option<&AddressSelector>,
    candidate: Option<Address>,
    children: Option<&dyn ChildAddressLookup>,
) -> bool {
    match selector {
        None => true,
        Some(AddressSelector::Single(address)) => candidate == Some(*address),
        Some(AddressSelector::List(list)) => {
            candidate.is_some_and(|address| list.contains(&address))
        }
        Some(AddressSelector::Factory(factory)) => match children {
            None => candidate.is_some(),
            Some(lookup) => candidate.is_some_and(|address| lookup.is_child(factory, address)),
        },
    }
}

pub fn log_matches(
    filter: &LogFilter,
    block_number: u64,
    log: &Log,
    children: Option<&dyn ChildAddressLookup>,
) -> bool {
    in_range(filter.from_block, filter.to_block, block_number)
        && value_matches(filter.topic0.as_ref(), log.topics.first())
        && value_matches(filter.topic1.as_ref(), log.topics.get(1))
        && value_matches(filter.topic2.as_ref(), log.topics.get(2))
        && value_matches(filter.topic3.as_ref(), log.topics.get(3))
        && address_matches(filter.address.as_ref(), Some(log.address), children)
}

pub fn transaction_matches(
    filter: &TransactionFilter,
    block_number: u64,
    transaction: &Transaction,
    children: Option<&dyn ChildAddressLookup>,
) -> bool {
    in_range(filter.from_block, filter.to_block, block_number)
        && address_matches(
            filter.from_address.as_ref(),
            Some(transaction.from),
            children,
        )
        && address_matches(filter.to_address.as_ref(), transaction.to, children)
}

pub fn trace_matches(
    filter: &TraceFilter,
    block_number: u64,
    trace: &BlockTrace,
    children: Option<&dyn ChildAddressLookup>,
) -> bool {
    in_range(filter.from_block, filter.to_block, block_number)
        && filter.call_type.is_none_or(|call_type| call_type == trace.call_type)
        && filter.function_selector.is_none_or(|selector| {
            trace.input.len() >= 4 && trace.input[..4] == selector[..]
        })
        && address_matches(filter.from_address.as_ref(), Some(trace.from), children)
        && address_matches(filter.to_address.as_ref(), trace.to, children)
}

pub fn transfer_matches(
    filter: &TransferFilter,
    block_number: u64,
    trace: &BlockTrace,
    children: Option<&dyn ChildAddressLookup>,
) -> bool {
    in_range(filter.from_block, filter.to_block, block_number)
        && trace.value.is_some_and(|value| !value.is_zero())
        && address_matches(filter.from_address.as_ref(), Some(trace.from), children)
        && address_matches(filter.to_address.as_ref(), trace.to, children)
}

pub fn block_matches(filter: &BlockFilter, number: u64) -> bool {
    in_range(filter.from_block, filter.to_block, number)
        && filter.interval > 0
        && number
            .checked_sub(filter.offset)
            .is_some_and(|shifted| shifted % filter.interval == 0)
}

/// Whether a log is an announcement of this factory: emitted by one of the
/// factory's addresses with the factory's event selector as topic0.
pub fn factory_matches(factory: &Factory, log: &Log) -> bool {
    !factory.address.is_empty()
        && factory.address.contains(&log.address)
        && log.topics.first() == Some(&factory.event_selector)
}

/// Decode the child address announced by a factory log. `None` when the log
/// is too short for the declared location.
pub fn extract_child_address(factory: &Factory, log: &Log) -> Option<Address> {
    match factory.child_location {
        ChildLocation::Topic(index) => {
            log.topics.get(index).map(|topic| Address::from_word(*topic))
        }
        ChildLocation::Offset(offset) => {
            let word = log.data.get(offset..offset + 32)?;
            Some(Address::from_slice(&word[12..32]))
        }
    }
}
