//! User-declared event filters and factories.
//!
//! Filters are disjoint tagged variants dispatched by `match`; the matching
//! logic itself lives in [`matcher`] as pure functions and the logs-bloom
//! pre-check in [`bloom`]. A filter whose address position references a
//! [`Factory`] matches against the factory's discovered child-address set,
//! provided through the [`ChildAddressLookup`] seam.

pub mod bloom;
pub mod matcher;

use std::collections::{HashMap, HashSet};

use alloy::primitives::{Address, B256, FixedBytes};
use serde::{Deserialize, Serialize};

use seine_common::types::CallType;

/// A single value or a list of acceptable values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueOrArray<T> {
    Value(T),
    Array(Vec<T>),
}

impl<T: PartialEq> ValueOrArray<T> {
    pub fn contains(&self, candidate: &T) -> bool {
        match self {
            ValueOrArray::Value(v) => v == candidate,
            ValueOrArray::Array(vs) => vs.contains(candidate),
        }
    }

    /// An empty list matches nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            ValueOrArray::Value(_) => false,
            ValueOrArray::Array(vs) => vs.is_empty(),
        }
    }
}

/// Where the child address lives in a factory's announcement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildLocation {
    /// An indexed topic (1 through 3); the address occupies the low 20 bytes.
    Topic(usize),
    /// A byte offset into the data section; the address occupies the low 20
    /// bytes of the 32-byte word starting there.
    Offset(usize),
}

/// A contract (or set of contracts) that announces newly created child
/// contracts through a known log event. The framework treats the factory's
/// child-address set as a dynamic filter target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factory {
    pub address: ValueOrArray<Address>,
    /// topic0 of the announcement event.
    pub event_selector: B256,
    pub child_location: ChildLocation,
}

/// An address constraint: a fixed address, a list, or the children of a
/// factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AddressSelector {
    Single(Address),
    List(Vec<Address>),
    Factory(Factory),
}

impl AddressSelector {
    pub fn as_factory(&self) -> Option<&Factory> {
        match self {
            AddressSelector::Factory(factory) => Some(factory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub chain_id: u64,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub to_block: Option<u64>,
    #[serde(default)]
    pub address: Option<AddressSelector>,
    #[serde(default)]
    pub topic0: Option<ValueOrArray<B256>>,
    #[serde(default)]
    pub topic1: Option<ValueOrArray<B256>>,
    #[serde(default)]
    pub topic2: Option<ValueOrArray<B256>>,
    #[serde(default)]
    pub topic3: Option<ValueOrArray<B256>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub chain_id: u64,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub to_block: Option<u64>,
    #[serde(default)]
    pub from_address: Option<AddressSelector>,
    #[serde(default)]
    pub to_address: Option<AddressSelector>,
    /// When false, receipts are fetched so downstream can drop reverted
    /// transactions; the filter itself never consults revert status.
    #[serde(default = "default_true")]
    pub include_reverted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFilter {
    pub chain_id: u64,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub to_block: Option<u64>,
    #[serde(default)]
    pub from_address: Option<AddressSelector>,
    #[serde(default)]
    pub to_address: Option<AddressSelector>,
    #[serde(default)]
    pub call_type: Option<CallType>,
    /// First four bytes of the call input.
    #[serde(default)]
    pub function_selector: Option<FixedBytes<4>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFilter {
    pub chain_id: u64,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub to_block: Option<u64>,
    #[serde(default)]
    pub from_address: Option<AddressSelector>,
    #[serde(default)]
    pub to_address: Option<AddressSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFilter {
    pub chain_id: u64,
    #[serde(default)]
    pub from_block: Option<u64>,
    #[serde(default)]
    pub to_block: Option<u64>,
    /// Matches every `interval`-th block, shifted by `offset`.
    pub interval: u64,
    #[serde(default)]
    pub offset: u64,
}

fn default_true() -> bool {
    true
}

/// The five disjoint filter variants a source can declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    Log(LogFilter),
    Transaction(TransactionFilter),
    Trace(TraceFilter),
    Transfer(TransferFilter),
    Block(BlockFilter),
}

impl Filter {
    pub fn chain_id(&self) -> u64 {
        match self {
            Filter::Log(f) => f.chain_id,
            Filter::Transaction(f) => f.chain_id,
            Filter::Trace(f) => f.chain_id,
            Filter::Transfer(f) => f.chain_id,
            Filter::Block(f) => f.chain_id,
        }
    }

    /// Factories referenced by this filter's address positions.
    pub fn factories(&self) -> Vec<&Factory> {
        let selectors: [Option<&AddressSelector>; 2] = match self {
            Filter::Log(f) => [f.address.as_ref(), None],
            Filter::Transaction(f) => [f.from_address.as_ref(), f.to_address.as_ref()],
            Filter::Trace(f) => [f.from_address.as_ref(), f.to_address.as_ref()],
            Filter::Transfer(f) => [f.from_address.as_ref(), f.to_address.as_ref()],
            Filter::Block(_) => [None, None],
        };
        selectors
            .into_iter()
            .flatten()
            .filter_map(AddressSelector::as_factory)
            .collect()
    }
}

/// The user-declared filters plus the factories collected from them.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub filters: Vec<Filter>,
    pub factories: Vec<Factory>,
}

impl Sources {
    pub fn new(filters: Vec<Filter>) -> Self {
        let mut factories: Vec<Factory> = Vec::new();
        for filter in &filters {
            for factory in filter.factories() {
                if !factories.contains(factory) {
                    factories.push(factory.clone());
                }
            }
        }
        Self { filters, factories }
    }

    /// Parse a JSON array of filter declarations.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let filters: Vec<Filter> = serde_json::from_str(raw)?;
        Ok(Self::new(filters))
    }

    /// Whether any source needs `eth_getLogs` for a block.
    pub fn needs_logs(&self) -> bool {
        !self.factories.is_empty()
            || self.filters.iter().any(|f| matches!(f, Filter::Log(_)))
    }

    /// Whether any source needs `debug_traceBlockByHash` for a block.
    pub fn needs_traces(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, Filter::Trace(_) | Filter::Transfer(_)))
    }
}

/// Membership test over a factory's discovered children. Implemented by the
/// factory tracker; matchers receive it so they stay pure.
pub trait ChildAddressLookup {
    fn is_child(&self, factory: &Factory, address: Address) -> bool;
}

impl ChildAddressLookup for HashMap<Factory, HashSet<Address>> {
    fn is_child(&self, factory: &Factory, address: Address) -> bool {
        self.get(factory).is_some_and(|set| set.contains(&address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn factory() -> Factory {
        Factory {
            address: ValueOrArray::Value(address!("00000000000000000000000000000000000000f1")),
            event_selector: B256::repeat_byte(0xab),
            child_location: ChildLocation::Topic(1),
        }
    }

    #[test]
    fn sources_collect_factories_once() {
        let f = factory();
        let filters = vec![
            Filter::Log(LogFilter {
                chain_id: 1,
                from_block: None,
                to_block: None,
                address: Some(AddressSelector::Factory(f.clone())),
                topic0: None,
                topic1: None,
                topic2: None,
                topic3: None,
            }),
            Filter::Transaction(TransactionFilter {
                chain_id: 1,
                from_block: None,
                to_block: None,
                from_address: None,
                to_address: Some(AddressSelector::Factory(f.clone())),
                include_reverted: true,
            }),
        ];
        let sources = Sources::new(filters);
        assert_eq!(sources.factories, vec![f]);
        assert!(sources.needs_logs());
        assert!(!sources.needs_traces());
    }

    #[test]
    fn filter_declarations_parse_from_json() {
        let raw = r#"[
            {
                "type": "log",
                "chainId": 1,
                "fromBlock": 100,
                "address": "0x00000000000000000000000000000000000000aa",
                "topic0": "0x00000000000000000000000000000000000000000000000000000000000000ff"
            },
            {
                "type": "block",
                "chainId": 1,
                "interval": 10,
                "offset": 3
            },
            {
                "type": "trace",
                "chainId": 1,
                "callType": "CALL",
                "functionSelector": "0xa9059cbb"
            }
        ]"#;
        let sources = Sources::from_json(raw).unwrap();
        assert_eq!(sources.filters.len(), 3);
        assert!(matches!(sources.filters[0], Filter::Log(_)));
        let Filter::Block(ref block) = sources.filters[1] else {
            panic!("expected block filter");
        };
        assert_eq!(block.interval, 10);
        assert_eq!(block.offset, 3);
        assert!(sources.needs_traces());
    }

    #[test]
    fn factory_address_selector_parses_from_json() {
        let raw = r#"[
            {
                "type": "log",
                "chainId": 1,
                "address": {
                    "address": "0x00000000000000000000000000000000000000f1",
                    "eventSelector": "0xabababababababababababababababababababababababababababababababab",
                    "childLocation": { "topic": 1 }
                }
            }
        ]"#;
        let sources = Sources::from_json(raw).unwrap();
        assert_eq!(sources.factories.len(), 1);
        assert_eq!(sources.factories[0].child_location, ChildLocation::Topic(1));
    }
}
