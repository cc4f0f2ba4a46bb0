//! Correlation IDs: linking serialized tree nodes back to document elements.
//!
//! Every node the serializer produces gets a [`CorrelationId`] that is recorded
//! in the run's [`CorrelationTable`]. Feedback arriving from the worker names
//! nodes by ID, and the table turns that ID back into the element it came from.
//!
//! Tables are owned by a [`RunContext`]. A new validation run always starts
//! from a fresh context, so IDs from an earlier run can never resolve against
//! a later run's elements.

use std::collections::BTreeMap;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Synthetic identifier for a serialized node.
///
/// Serializes as a bare integer so it reads naturally inside JSON messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(NonZeroU64);

impl CorrelationId {
    /// Create a `CorrelationId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(CorrelationId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a correlated node came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "origin", content = "index")]
pub enum Origin {
    /// The implicit root environment of the whole document.
    Document,
    /// An element, by its position in the ordered element list.
    Element(usize),
}

/// Map from correlation IDs to node origins for one validation run.
#[derive(Debug, Clone)]
pub struct CorrelationTable {
    entries: BTreeMap<CorrelationId, Origin>,
    next: NonZeroU64,
}

impl CorrelationTable {
    /// Create an empty table; the first assigned ID is 1.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next: NonZeroU64::MIN,
        }
    }

    /// Assign a fresh ID to `origin`.
    pub fn assign(&mut self, origin: Origin) -> CorrelationId {
        let id = CorrelationId(self.next);
        // u64 exhaustion is not reachable within one document.
        self.next = self.next.saturating_add(1);
        self.entries.insert(id, origin);
        id
    }

    /// Look up the origin of an ID.
    pub fn get(&self, id: CorrelationId) -> Option<Origin> {
        self.entries.get(&id).copied()
    }

    /// All IDs assigned to nodes produced by the element at `index`, in order.
    pub fn ids_for(&self, index: usize) -> Vec<CorrelationId> {
        self.entries
            .iter()
            .filter(|(_, origin)| **origin == Origin::Element(index))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(id, origin)` pairs in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (CorrelationId, Origin)> + '_ {
        self.entries.iter().map(|(id, origin)| (*id, *origin))
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequence number of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run:{}", self.0)
    }
}

/// Per-run state owned by the serializing side.
///
/// Passed into the serializer by value and handed back populated, so each run
/// owns its table outright.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run: RunId,
    pub table: CorrelationTable,
}

impl RunContext {
    /// Context for the first run of a session.
    pub fn first() -> Self {
        Self {
            run: RunId(1),
            table: CorrelationTable::new(),
        }
    }

    /// Fresh context for the run after this one. The table starts empty.
    pub fn next(&self) -> Self {
        Self {
            run: RunId(self.run.0 + 1),
            table: CorrelationTable::new(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_an_id() {
        assert!(CorrelationId::new(0).is_none());
        assert_eq!(CorrelationId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn option_id_is_niche_optimized() {
        assert_eq!(
            std::mem::size_of::<Option<CorrelationId>>(),
            std::mem::size_of::<CorrelationId>()
        );
    }

    #[test]
    fn ids_are_assigned_from_one() {
        let mut table = CorrelationTable::new();
        let root = table.assign(Origin::Document);
        let a = table.assign(Origin::Element(0));
        let b = table.assign(Origin::Element(0));
        let c = table.assign(Origin::Element(3));

        assert_eq!(root.get(), 1);
        assert_eq!(a.get(), 2);
        assert_eq!(table.get(c), Some(Origin::Element(3)));
        assert_eq!(table.ids_for(0), vec![a, b]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn next_run_starts_empty() {
        let mut ctx = RunContext::first();
        ctx.table.assign(Origin::Document);
        let next = ctx.next();
        assert_eq!(next.run, RunId(2));
        assert!(next.table.is_empty());
    }

    #[test]
    fn id_serializes_as_number() {
        let id = CorrelationId::new(42).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: CorrelationId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }
}
