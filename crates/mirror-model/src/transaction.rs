//! Transactional change batching
//!
//! Every store mutation is recorded as a [`Change`]. While a transaction is
//! open, changes accumulate; when the outermost [`TransactionGuard`] drops,
//! observers receive them as one [`ChangeBatch`]. Nested transactions join the
//! enclosing batch.

use crate::key::NodeKey;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Label used for mutations made outside any transaction
pub const IMPLICIT_LABEL: &str = "implicit";

/// Single recorded mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Root registered
    Registered(NodeKey),
    /// Node data replaced in place
    Replaced(NodeKey),
    /// Node inserted
    Inserted(NodeKey),
    /// Node removed
    Removed(NodeKey),
    /// Focus flag toggled
    Focus {
        /// Node whose flag changed
        key: NodeKey,
        /// New flag value
        focused: bool,
    },
}

impl Change {
    /// Key the change applies to
    #[inline]
    #[must_use]
    pub fn key(&self) -> &NodeKey {
        match self {
            Self::Registered(key) | Self::Replaced(key) | Self::Inserted(key) | Self::Removed(key) => key,
            Self::Focus { key, .. } => key,
        }
    }
}

/// Changes delivered to observers after a transaction completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Label of the outermost transaction
    pub label: String,
    /// Store revision after applying the batch
    pub revision: u64,
    /// Changes in application order
    pub changes: Vec<Change>,
}

/// Observer identifier returned by [`Transactions::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observer callback
pub type Observer = Arc<dyn Fn(&ChangeBatch) + Send + Sync>;

#[derive(Default)]
struct TxnState {
    depth: usize,
    label: Option<String>,
    pending: Vec<Change>,
    revision: u64,
}

/// Transaction bookkeeping and observer registry
#[derive(Default)]
pub struct Transactions {
    state: Mutex<TxnState>,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl fmt::Debug for Transactions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transactions")
            .field("depth", &state.depth)
            .field("pending", &state.pending.len())
            .field("revision", &state.revision)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl Transactions {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction; changes are flushed when the guard drops
    pub fn begin(&self, label: &str) -> TransactionGuard<'_> {
        let mut state = self.state.lock();
        if state.depth == 0 {
            state.label = Some(label.to_string());
        }
        state.depth += 1;
        TransactionGuard { txns: self }
    }

    /// Whether a transaction is currently open
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Number of batches emitted so far
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Register observer
    pub fn observe(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove observer; returns whether it was registered
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Record changes; emitted immediately when no transaction is open
    pub fn record(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }

        let batch = {
            let mut state = self.state.lock();
            if state.depth > 0 {
                state.pending.extend(changes);
                return;
            }
            state.revision += 1;
            ChangeBatch {
                label: IMPLICIT_LABEL.to_string(),
                revision: state.revision,
                changes,
            }
        };

        self.emit(&batch);
    }

    fn end(&self) {
        let batch = {
            let mut state = self.state.lock();
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 {
                return;
            }
            let label = state.label.take().unwrap_or_else(|| IMPLICIT_LABEL.to_string());
            if state.pending.is_empty() {
                return;
            }
            state.revision += 1;
            ChangeBatch {
                label,
                revision: state.revision,
                changes: std::mem::take(&mut state.pending),
            }
        };

        self.emit(&batch);
    }

    fn emit(&self, batch: &ChangeBatch) {
        // Observers may read the store, so none of our locks are held here.
        let observers: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        tracing::trace!(
            "Emitting batch '{}' (revision {}, {} changes)",
            batch.label,
            batch.revision,
            batch.changes.len()
        );

        for observer in observers {
            observer(batch);
        }
    }
}

/// Scoped transaction; the outermost guard flushes on drop
#[must_use = "dropping the guard immediately ends the transaction"]
pub struct TransactionGuard<'a> {
    txns: &'a Transactions,
}

impl fmt::Debug for TransactionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionGuard").finish_non_exhaustive()
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.txns.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting(txns: &Transactions) -> Arc<Mutex<Vec<ChangeBatch>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        txns.observe(Arc::new(move |batch: &ChangeBatch| sink.lock().push(batch.clone())));
        seen
    }

    #[test]
    fn transaction_emits_single_batch() {
        let txns = Transactions::new();
        let seen = collecting(&txns);

        {
            let _txn = txns.begin("mutation");
            txns.record(vec![Change::Replaced("a".into())]);
            txns.record(vec![Change::Inserted("b".into()), Change::Removed("c".into())]);
            assert!(seen.lock().is_empty());
        }

        let batches = seen.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].label, "mutation");
        assert_eq!(batches[0].changes.len(), 3);
        assert_eq!(batches[0].revision, 1);
    }

    #[test]
    fn nested_transactions_join_outer_batch() {
        let txns = Transactions::new();
        let seen = collecting(&txns);

        {
            let _outer = txns.begin("outer");
            {
                let _inner = txns.begin("inner");
                txns.record(vec![Change::Replaced("a".into())]);
            }
            assert!(seen.lock().is_empty());
            txns.record(vec![Change::Replaced("b".into())]);
        }

        let batches = seen.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].label, "outer");
        assert_eq!(batches[0].changes.len(), 2);
    }

    #[test]
    fn empty_transaction_emits_nothing() {
        let txns = Transactions::new();
        let seen = collecting(&txns);

        drop(txns.begin("noop"));

        assert!(seen.lock().is_empty());
        assert_eq!(txns.revision(), 0);
        assert!(!txns.in_transaction());
    }

    #[test]
    fn changes_outside_transaction_are_implicit() {
        let txns = Transactions::new();
        let seen = collecting(&txns);

        txns.record(vec![Change::Focus {
            key: "a".into(),
            focused: true,
        }]);

        let batches = seen.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].label, IMPLICIT_LABEL);
    }

    #[test]
    fn unobserve_stops_delivery() {
        let txns = Transactions::new();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = txns.observe(Arc::new(move |_: &ChangeBatch| *sink.lock() += 1));

        txns.record(vec![Change::Replaced("a".into())]);
        assert!(txns.unobserve(id));
        assert!(!txns.unobserve(id));
        txns.record(vec![Change::Replaced("a".into())]);

        assert_eq!(*seen.lock(), 1);
    }
}
