//! Idle detection
//!
//! An idle detector resolves once the host has a quiet slice. The scheduler
//! races it against its maximum idle wait.

use async_trait::async_trait;
use tokio::sync::Notify;

/// Signals that the host is idle
#[async_trait]
pub trait IdleDetector: Send + Sync + 'static {
    /// Resolve at the next idle slice
    async fn idle(&self);
}

/// Treats the runtime as idle after a few cooperative yields
///
/// Any task that was ready to run gets a turn before the pass starts.
#[derive(Debug, Clone, Copy)]
pub struct YieldIdle {
    rounds: u32,
}

impl YieldIdle {
    /// Create detector yielding `rounds` times
    #[inline]
    #[must_use]
    pub fn new(rounds: u32) -> Self {
        Self { rounds }
    }
}

impl Default for YieldIdle {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl IdleDetector for YieldIdle {
    async fn idle(&self) {
        for _ in 0..self.rounds {
            tokio::task::yield_now().await;
        }
    }
}

/// Idle detector driven by the host
///
/// The host calls [`NotifyIdle::signal_idle`] whenever it enters a quiet
/// period. A signal sent while nobody waits is kept for the next wait.
#[derive(Debug, Default)]
pub struct NotifyIdle {
    notify: Notify,
}

impl NotifyIdle {
    /// Create detector
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an idle slice
    pub fn signal_idle(&self) {
        self.notify.notify_one();
    }
}

#[async_trait]
impl IdleDetector for NotifyIdle {
    async fn idle(&self) {
        self.notify.notified().await;
    }
}

/// Never reports idle; the pass always runs at its maximum wait
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverIdle;

#[async_trait]
impl IdleDetector for NeverIdle {
    async fn idle(&self) {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn yield_idle_resolves() {
        let detector = YieldIdle::new(3);
        tokio::time::timeout(Duration::from_secs(1), detector.idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stored_signal_is_consumed_by_next_wait() {
        let detector = NotifyIdle::new();
        detector.signal_idle();
        tokio::time::timeout(Duration::from_secs(1), detector.idle())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_idle_does_not_resolve() {
        let result = tokio::time::timeout(Duration::from_millis(50), NeverIdle.idle()).await;
        assert!(result.is_err());
    }
}
