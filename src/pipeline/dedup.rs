//! Deduplication filter: drops transactions the ledger already holds.
//!
//! Pure function of (raw dataset, existing-keys snapshot). The raw dataset
//! is borrowed, never mutated.

use std::collections::HashSet;

use tracing::debug;

use crate::pipeline::types::{ExistingKeys, Transaction};

/// Result of filtering a raw dataset.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Transactions whose key is absent from the ledger, in source order.
    pub new_transactions: Vec<Transaction>,
    /// Rows skipped because the ledger already has their key.
    pub skipped_existing: usize,
    /// Rows skipped because an earlier row in the same batch had their key.
    pub skipped_in_batch: usize,
}

/// Keep only transactions whose dedup key is not in `existing`.
///
/// Repeated keys within the batch keep their first occurrence, so every
/// unseen key appears exactly once in the output.
pub fn filter_new(raw: &[Transaction], existing: &ExistingKeys) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut batch_seen: HashSet<String> = HashSet::with_capacity(raw.len());

    for txn in raw {
        let key = txn.dedup_key();
        if existing.contains(&key) {
            outcome.skipped_existing += 1;
            continue;
        }
        if !batch_seen.insert(key.clone()) {
            debug!(key = %key, "Duplicate key within batch, keeping first occurrence");
            outcome.skipped_in_batch += 1;
            continue;
        }
        outcome.new_transactions.push(txn.clone());
    }

    outcome
}
