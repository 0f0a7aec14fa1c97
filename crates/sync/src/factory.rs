//! Two-tier tracking of factory-discovered child addresses.
//!
//! Children found in unfinalized blocks live in the `unfinalized` tier and
//! are recomputed from the cached factory logs whenever the unfinalized
//! block list changes shape (finalization or reorg). Child derivation is
//! block-local and cheap, so full recomputation replaces incremental
//! reverse-deltas entirely.

use std::collections::{HashMap, HashSet};

use alloy::primitives::{Address, B256};

use seine_common::types::{LightBlock, Log};
use seine_filters::{ChildAddressLookup, Factory, matcher};

pub struct FactoryTracker {
    factories: Vec<Factory>,
    /// Monotonically grows within a run; cleared only by [`reset`].
    ///
    /// [`reset`]: FactoryTracker::reset
    finalized: HashMap<Factory, HashSet<Address>>,
    unfinalized: HashMap<Factory, HashSet<Address>>,
    /// Factory announcement logs per unfinalized block hash.
    factory_logs: HashMap<B256, Vec<Log>>,
}

fn empty_sets(factories: &[Factory]) -> HashMap<Factory, HashSet<Address>> {
    factories
        .iter()
        .map(|factory| (factory.clone(), HashSet::new()))
        .collect()
}

/// Insert every child announced by `logs` into `into`, one entry per
/// factory the log matches. Undecodable announcements are skipped.
fn insert_children(
    factories: &[Factory],
    logs: &[Log],
    into: &mut HashMap<Factory, HashSet<Address>>,
) {
    for factory in factories {
        for log in logs.iter().filter(|log| matcher::factory_matches(factory, log)) {
            match matcher::extract_child_address(factory, log) {
                Some(child) => {
                    into.entry(factory.clone()).or_default().insert(child);
                }
                None => {
                    tracing::debug!(
                        service = "sync",
                        address = %log.address,
                        log_index = log.log_index(),
                        "Factory log did not decode to a child address, skipping"
                    );
                }
            }
        }
    }
}

impl FactoryTracker {
    pub fn new(factories: Vec<Factory>) -> Self {
        let finalized = empty_sets(&factories);
        let unfinalized = empty_sets(&factories);
        Self {
            factories,
            finalized,
            unfinalized,
            factory_logs: HashMap::new(),
        }
    }

    /// Record an ingested block's factory logs and fold its children into
    /// the unfinalized tier.
    pub fn record_block(&mut self, block_hash: B256, logs: Vec<Log>) {
        insert_children(&self.factories, &logs, &mut self.unfinalized);
        self.factory_logs.insert(block_hash, logs);
    }

    /// Promote the children of `promoted` blocks into the finalized tier,
    /// drop their cached logs, and rebuild the unfinalized tier from the
    /// blocks that remain.
    pub fn finalize(&mut self, promoted: &[LightBlock], remaining: &[LightBlock]) {
        for block in promoted {
            if let Some(logs) = self.factory_logs.remove(&block.hash) {
                insert_children(&self.factories, &logs, &mut self.finalized);
            }
        }
        self.recompute_unfinalized(remaining);
    }

    /// Drop the cached logs of reorged-out blocks and rebuild the
    /// unfinalized tier from the blocks that remain.
    pub fn rewind(&mut self, reorged: &[LightBlock], remaining: &[LightBlock]) {
        for block in reorged {
            self.factory_logs.remove(&block.hash);
        }
        self.recompute_unfinalized(remaining);
    }

    fn recompute_unfinalized(&mut self, remaining: &[LightBlock]) {
        let mut rebuilt = empty_sets(&self.factories);
        for block in remaining {
            if let Some(logs) = self.factory_logs.get(&block.hash) {
                insert_children(&self.factories, logs, &mut rebuilt);
            }
        }
        self.unfinalized = rebuilt;
    }

    /// Drop all tracked state, including the finalized tier.
    pub fn reset(&mut self) {
        self.finalized = empty_sets(&self.factories);
        self.unfinalized = empty_sets(&self.factories);
        self.factory_logs.clear();
    }

    pub fn finalized_children(&self, factory: &Factory) -> Option<&HashSet<Address>> {
        self.finalized.get(factory)
    }

    pub fn unfinalized_children(&self, factory: &Factory) -> Option<&HashSet<Address>> {
        self.unfinalized.get(factory)
    }
}

impl ChildAddressLookup for FactoryTracker {
    /// Membership over the union of the finalized and unfinalized tiers.
    fn is_child(&self, factory: &Factory, address: Address) -> bool {
        self.finalized
            .get(factory)
            .is_some_and(|set| set.contains(&address))
            || self
                .unfinalized
                .get(factory)
                .is_some_and(|set| set.contains(&address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    use seine_filters::{ChildLocation, ValueOrArray};

    use crate::testing;

    const FACTORY_ADDR: Address = address!("00000000000000000000000000000000000000f1");
    const CHILD_A: Address = address!("00000000000000000000000000000000000000c1");
    const CHILD_B: Address = address!("00000000000000000000000000000000000000c2");

    fn factory() -> Factory {
        Factory {
            address: ValueOrArray::Value(FACTORY_ADDR),
            event_selector: B256::repeat_byte(0xab),
            child_location: ChildLocation::Topic(1),
        }
    }

    fn announcement(block: &LightBlock, child: Address) -> Log {
        let mut log = testing::log_in_block(
            block.hash,
            block.number,
            FACTORY_ADDR,
            vec![factory().event_selector, testing::address_topic(child)],
            0,
        );
        log.transaction_hash = Some(testing::hash(0xfeed));
        log
    }

    fn light(number: u64) -> LightBlock {
        LightBlock {
            number,
            hash: testing::block_hash(number, 0),
            parent_hash: testing::block_hash(number - 1, 0),
            timestamp: number,
        }
    }

    #[test]
    fn record_block_discovers_children() {
        let mut tracker = FactoryTracker::new(vec![factory()]);
        let block = light(101);
        tracker.record_block(block.hash, vec![announcement(&block, CHILD_A)]);

        assert!(tracker.is_child(&factory(), CHILD_A));
        assert!(!tracker.is_child(&factory(), CHILD_B));
        assert!(
            tracker
                .unfinalized_children(&factory())
                .unwrap()
                .contains(&CHILD_A)
        );
        assert!(tracker.finalized_children(&factory()).unwrap().is_empty());
    }

    #[test]
    fn finalize_promotes_and_rebuilds() {
        let mut tracker = FactoryTracker::new(vec![factory()]);
        let b101 = light(101);
        let b102 = light(102);
        tracker.record_block(b101.hash, vec![announcement(&b101, CHILD_A)]);
        tracker.record_block(b102.hash, vec![announcement(&b102, CHILD_B)]);

        tracker.finalize(&[b101], &[b102]);

        let finalized = tracker.finalized_children(&factory()).unwrap();
        let unfinalized = tracker.unfinalized_children(&factory()).unwrap();
        assert!(finalized.contains(&CHILD_A));
        assert!(!finalized.contains(&CHILD_B));
        assert!(unfinalized.contains(&CHILD_B));
        assert!(!unfinalized.contains(&CHILD_A));
        // Both tiers still answer membership.
        assert!(tracker.is_child(&factory(), CHILD_A));
        assert!(tracker.is_child(&factory(), CHILD_B));
    }

    #[test]
    fn rewind_forgets_reorged_children() {
        let mut tracker = FactoryTracker::new(vec![factory()]);
        let b101 = light(101);
        let b102 = light(102);
        tracker.record_block(b101.hash, vec![announcement(&b101, CHILD_A)]);
        tracker.record_block(b102.hash, vec![announcement(&b102, CHILD_B)]);

        tracker.rewind(&[b102], &[b101]);

        assert!(tracker.is_child(&factory(), CHILD_A));
        assert!(!tracker.is_child(&factory(), CHILD_B));
    }

    #[test]
    fn child_reannounced_in_surviving_block_is_kept() {
        // The same child announced in two blocks must survive a rewind that
        // drops only one of them.
        let mut tracker = FactoryTracker::new(vec![factory()]);
        let b101 = light(101);
        let b102 = light(102);
        tracker.record_block(b101.hash, vec![announcement(&b101, CHILD_A)]);
        tracker.record_block(b102.hash, vec![announcement(&b102, CHILD_A)]);

        tracker.rewind(&[b102], &[b101]);

        assert!(tracker.is_child(&factory(), CHILD_A));
    }

    #[test]
    fn reset_clears_every_tier() {
        let mut tracker = FactoryTracker::new(vec![factory()]);
        let b101 = light(101);
        tracker.record_block(b101.hash, vec![announcement(&b101, CHILD_A)]);
        tracker.finalize(&[b101], &[]);
        assert!(tracker.is_child(&factory(), CHILD_A));

        tracker.reset();
        assert!(!tracker.is_child(&factory(), CHILD_A));
    }
}
