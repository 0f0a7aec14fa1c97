//! Conservative logs-bloom pre-checks.
//!
//! Used only to skip `eth_getLogs` calls: a `false` return is a proof that
//! no log in the block can satisfy the filter, so false negatives are
//! forbidden. The probe is the yellow-paper three-hash scheme exposed by
//! alloy's `Bloom::contains_input`.

use alloy::primitives::{Bloom, BloomInput};

use crate::{AddressSelector, Factory, LogFilter, ValueOrArray};

/// Whether any log in a block with this bloom could satisfy the filter.
///
/// An all-zero bloom always returns `true`: some chains zero the field when
/// it is empty-or-unknown, so the caller must fetch to be sure.
pub fn log_filter_may_match(bloom: &Bloom, filter: &LogFilter) -> bool {
    if bloom.is_zero() {
        return true;
    }

    let address_hit = match filter.address.as_ref() {
        // Absent constraint, or a child set unknown at probe time.
        None | Some(AddressSelector::Factory(_)) => true,
        Some(AddressSelector::Single(address)) => {
            bloom.contains_input(BloomInput::Raw(address.as_slice()))
        }
        Some(AddressSelector::List(addresses)) => addresses
            .iter()
            .any(|address| bloom.contains_input(BloomInput::Raw(address.as_slice()))),
    };
    if !address_hit {
        return false;
    }

    [&filter.topic0, &filter.topic1, &filter.topic2, &filter.topic3]
        .into_iter()
        .all(|constraint| topic_may_match(bloom, constraint.as_ref()))
}

/// Whether any log in a block with this bloom could be an announcement of
/// this factory.
pub fn factory_may_match(bloom: &Bloom, factory: &Factory) -> bool {
    if bloom.is_zero() {
        return true;
    }

    let address_hit = match &factory.address {
        ValueOrArray::Value(address) => {
            bloom.contains_input(BloomInput::Raw(address.as_slice()))
        }
        ValueOrArray::Array(addresses) => addresses
            .iter()
            .any(|address| bloom.contains_input(BloomInput::Raw(address.as_slice()))),
    };
    address_hit && bloom.contains_input(BloomInput::Raw(factory.event_selector.as_slice()))
}

fn topic_may_match(
    bloom: &Bloom,
    constraint: Option<&ValueOrArray<alloy::primitives::B256>>,
) -> bool {
    match constraint {
        None => true,
        Some(ValueOrArray::Value(topic)) => {
            bloom.contains_input(BloomInput::Raw(topic.as_slice()))
        }
        Some(ValueOrArray::Array(topics)) => topics
            .iter()
            .any(|topic| bloom.contains_input(BloomInput::Raw(topic.as_slice()))),
    }
}
