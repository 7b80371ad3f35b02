//! Layer 1: Vector clocks
//!
//! The causal-history value stamped on every document version. Supports
//! the three questions the staging classifier asks: equality, descent,
//! and concurrency.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identity::NodeTag;

/// Causal history of a document version.
///
/// Maps writer slots to tick counts; a missing entry reads as zero.
/// `BTreeMap` keeps iteration (and serialization) deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VClock(BTreeMap<NodeTag, u64>);

impl VClock {
    /// The empty history: a brand-new document that nobody has written.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tick count for a slot; absent slots are zero.
    pub fn get(&self, tag: &NodeTag) -> u64 {
        self.0.get(tag).copied().unwrap_or(0)
    }

    /// Advance by one tick under `tag`, leaving other slots untouched.
    pub fn next(&self, tag: &NodeTag) -> VClock {
        let mut ticks = self.0.clone();
        *ticks.entry(tag.clone()).or_insert(0) += 1;
        VClock(ticks)
    }

    /// True iff `self` causally succeeds or equals `other`: every slot of
    /// `other` is at or below the matching slot here.
    pub fn descends(&self, other: &VClock) -> bool {
        other.0.iter().all(|(tag, &n)| self.get(tag) >= n)
    }

    /// Neither history descends the other.
    pub fn concurrent_with(&self, other: &VClock) -> bool {
        !self.descends(other) && !other.descends(self)
    }
}
