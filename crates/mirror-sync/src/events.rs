//! Host event queue
//!
//! Hosts push structural batches and interaction events into an
//! [`EventSink`]; the engine's pump task drains the matching
//! [`EventQueue`]. The queue is bounded. When it is full the event is
//! dropped and the overflow flag is raised, which makes the engine rebuild
//! the whole mirror once the backlog has drained.

use crate::live::{InteractionEvent, MutationRecord};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Event delivered by the host
#[derive(Debug)]
pub enum HostEvent<E> {
    /// One batch of structural change records
    Mutations(Vec<MutationRecord<E>>),
    /// One interaction event
    Interaction(InteractionEvent<E>),
}

/// Outcome of handing an event to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Event queued for the engine
    Queued,
    /// Queue full; event dropped and a resync scheduled
    Dropped,
    /// Engine disconnected; event discarded
    Closed,
}

#[derive(Debug, Default)]
pub(crate) struct QueueStats {
    overflow: AtomicBool,
    dropped: AtomicU64,
}

impl QueueStats {
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Host-side handle feeding the engine's event queue
pub struct EventSink<E> {
    tx: mpsc::Sender<HostEvent<E>>,
    stats: Arc<QueueStats>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<E> fmt::Debug for EventSink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("closed", &self.tx.is_closed())
            .field("dropped", &self.stats.dropped())
            .finish()
    }
}

impl<E> EventSink<E> {
    /// Deliver a batch of structural change records
    pub fn deliver_mutations(&self, records: Vec<MutationRecord<E>>) -> Delivery {
        if records.is_empty() {
            return Delivery::Queued;
        }
        self.send(HostEvent::Mutations(records))
    }

    /// Deliver an interaction event
    pub fn deliver_interaction(&self, event: InteractionEvent<E>) -> Delivery {
        self.send(HostEvent::Interaction(event))
    }

    /// Whether the receiving engine has gone away
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: HostEvent<E>) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.stats.overflow.swap(true, Ordering::AcqRel) {
                    tracing::warn!("Host event queue full; dropping events until the next resync");
                }
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Engine-side end of the host event queue
pub(crate) struct EventQueue<E> {
    rx: mpsc::Receiver<HostEvent<E>>,
    stats: Arc<QueueStats>,
}

impl<E> EventQueue<E> {
    pub(crate) async fn recv(&mut self) -> Option<HostEvent<E>> {
        self.rx.recv().await
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.rx.is_empty()
    }

    /// Clear the overflow flag, returning whether it was set
    pub(crate) fn take_overflow(&self) -> bool {
        self.stats.overflow.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}

/// Create a bounded queue and its first sink
pub(crate) fn channel<E>(capacity: usize) -> (EventSink<E>, EventQueue<E>, Arc<QueueStats>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stats = Arc::new(QueueStats::default());
    (
        EventSink {
            tx,
            stats: Arc::clone(&stats),
        },
        EventQueue {
            rx,
            stats: Arc::clone(&stats),
        },
        stats,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::InteractionKind;

    #[tokio::test]
    async fn full_queue_drops_and_flags_overflow() {
        let (sink, mut queue, stats) = channel::<()>(1);
        let node = Arc::new(());

        assert_eq!(
            sink.deliver_interaction(InteractionEvent::new(Arc::clone(&node), InteractionKind::Focus)),
            Delivery::Queued
        );
        assert_eq!(
            sink.deliver_interaction(InteractionEvent::new(Arc::clone(&node), InteractionKind::Blur)),
            Delivery::Dropped
        );
        assert_eq!(stats.dropped(), 1);

        assert!(matches!(queue.recv().await, Some(HostEvent::Interaction(_))));
        assert!(queue.is_drained());
        assert!(queue.take_overflow());
        assert!(!queue.take_overflow());
    }

    #[tokio::test]
    async fn closed_queue_discards() {
        let (sink, mut queue, _) = channel::<()>(4);
        queue.close();
        assert!(sink.is_closed());
        let delivery = sink.deliver_mutations(vec![MutationRecord::new(
            Arc::new(()),
            crate::live::MutationKind::ChildList,
        )]);
        assert_eq!(delivery, Delivery::Closed);
    }

    #[test]
    fn empty_batch_is_not_queued() {
        let (sink, queue, _) = channel::<()>(1);
        assert_eq!(sink.deliver_mutations(Vec::new()), Delivery::Queued);
        assert!(queue.is_drained());
    }
}
