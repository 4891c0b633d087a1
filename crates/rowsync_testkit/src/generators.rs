//! Property-based test generators using proptest.

use crate::fixtures::{category, TestParty};
use proptest::prelude::*;
use rowsync_protocol::{ConflictPolicy, SyncDirection, TableSyncStrategy};

/// An application edit to the `categories` table.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    /// Insert or replace a category.
    Put(i64, String),
    /// Delete a category.
    Remove(i64),
}

impl Edit {
    /// Applies the edit to `party`.
    pub fn apply(&self, party: &TestParty) {
        match self {
            Edit::Put(id, name) => party.write("categories", category(*id, name)),
            Edit::Remove(id) => party.remove("categories", *id),
        }
    }
}

/// Applies `edits` in order.
pub fn apply_edits(party: &TestParty, edits: &[Edit]) {
    for edit in edits {
        edit.apply(party);
    }
}

/// Strategy for edits over a small key space, so that sides collide.
pub fn edit_strategy(keys: i64) -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (1..=keys, "[A-Za-z ]{1,12}").prop_map(|(id, name)| Edit::Put(id, name)),
        1 => (1..=keys).prop_map(Edit::Remove),
    ]
}

/// Strategy for a batch of edits.
pub fn edits_strategy(keys: i64, max: usize) -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(edit_strategy(keys), 0..max)
}

/// Strategy for non-deciding conflict policies.
pub fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![Just(ConflictPolicy::ServerWins), Just(ConflictPolicy::ClientWins)]
}

/// Strategy for bidirectional table strategies.
pub fn table_strategy() -> impl Strategy<Value = TableSyncStrategy> {
    policy_strategy().prop_map(|policy| TableSyncStrategy::new(SyncDirection::Bidirectional, policy))
}
