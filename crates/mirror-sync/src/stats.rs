//! Engine statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Structural batches handled
    pub mutation_batches: u64,
    /// Structural records whose target was tracked
    pub mutation_records: u64,
    /// Structural records skipped because the target was untracked
    pub skipped_records: u64,
    /// Subtrees merged into the store
    pub rebuilds: u64,
    /// Rebuilds abandoned because the builder produced nothing
    pub empty_rebuilds: u64,
    /// Rebuilds the store rejected
    pub rejected_rebuilds: u64,
    /// Reconciliation passes run
    pub reconcile_passes: u64,
    /// Focus flags actually flipped in the store
    pub focus_changes: u64,
    /// Host events dropped on a full queue
    pub dropped_events: u64,
    /// Full rebuilds after queue overflow
    pub resyncs: u64,
    /// Cache entries pruned after their node was dropped
    pub pruned_entries: u64,
    /// Entries currently in the previous state cache
    pub cached_controls: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) mutation_batches: AtomicU64,
    pub(crate) mutation_records: AtomicU64,
    pub(crate) skipped_records: AtomicU64,
    pub(crate) rebuilds: AtomicU64,
    pub(crate) empty_rebuilds: AtomicU64,
    pub(crate) rejected_rebuilds: AtomicU64,
    pub(crate) reconcile_passes: AtomicU64,
    pub(crate) focus_changes: AtomicU64,
    pub(crate) resyncs: AtomicU64,
    pub(crate) pruned_entries: AtomicU64,
}

impl StatCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, dropped_events: u64, cached_controls: usize) -> SyncStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SyncStats {
            mutation_batches: load(&self.mutation_batches),
            mutation_records: load(&self.mutation_records),
            skipped_records: load(&self.skipped_records),
            rebuilds: load(&self.rebuilds),
            empty_rebuilds: load(&self.empty_rebuilds),
            rejected_rebuilds: load(&self.rejected_rebuilds),
            reconcile_passes: load(&self.reconcile_passes),
            focus_changes: load(&self.focus_changes),
            dropped_events,
            resyncs: load(&self.resyncs),
            pruned_entries: load(&self.pruned_entries),
            cached_controls: cached_controls as u64,
        }
    }
}
