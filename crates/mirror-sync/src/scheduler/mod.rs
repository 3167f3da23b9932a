//! Idle scheduler
//!
//! Runs a callback repeatedly, at most once per interval, preferring idle
//! slices of the host. Each wait for idleness is capped by a maximum idle
//! wait so the callback cannot be deferred forever under sustained load.
//!
//! ```text
//!   start ──► sleep until last_start + interval
//!                │
//!                ▼
//!        ┌── idle detector ──┐
//!        │        or         ├──► invoke callback ──► loop
//!        └─ max idle wait ───┘
//! ```

mod idle;

pub use idle::{IdleDetector, NeverIdle, NotifyIdle, YieldIdle};

use parking_lot::ReentrantMutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback run by the scheduler
pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;

struct SchedulerShared {
    stopped: AtomicBool,
    /// Held for the whole of every invocation and by `stop`
    gate: ReentrantMutex<()>,
    invocations: AtomicU64,
}

impl SchedulerShared {
    /// Invoke unless stopped; returns `false` once stopped
    fn invoke(&self, callback: &IdleCallback) -> bool {
        let _gate = self.gate.lock();
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.invocations.fetch_add(1, Ordering::Relaxed);
        callback();
        true
    }
}

/// Best-effort low-priority repeating timer
pub struct IdleScheduler {
    callback: IdleCallback,
    interval: Duration,
    max_idle_wait: Duration,
    detector: Arc<dyn IdleDetector>,
    shared: Arc<SchedulerShared>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for IdleScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleScheduler")
            .field("interval", &self.interval)
            .field("max_idle_wait", &self.max_idle_wait)
            .field("running", &self.is_running())
            .field("invocations", &self.invocations())
            .finish_non_exhaustive()
    }
}

impl IdleScheduler {
    /// Create scheduler for `callback` with the given interval
    ///
    /// Defaults: 500ms maximum idle wait and a [`YieldIdle`] detector.
    #[must_use]
    pub fn new(callback: impl Fn() + Send + Sync + 'static, interval: Duration) -> Self {
        Self {
            callback: Arc::new(callback),
            interval,
            max_idle_wait: Duration::from_millis(500),
            detector: Arc::new(YieldIdle::default()),
            shared: Arc::new(SchedulerShared {
                stopped: AtomicBool::new(false),
                gate: ReentrantMutex::new(()),
                invocations: AtomicU64::new(0),
            }),
            task: None,
        }
    }

    /// With maximum idle wait
    #[inline]
    #[must_use]
    pub fn with_max_idle_wait(mut self, wait: Duration) -> Self {
        self.max_idle_wait = wait;
        self
    }

    /// With idle detector
    #[inline]
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn IdleDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Begin scheduling on the current tokio runtime
    ///
    /// A scheduler starts at most once. Starting a stopped or running
    /// scheduler, or starting outside a runtime, leaves it unscheduled.
    #[must_use]
    pub fn start(mut self) -> Self {
        if self.task.is_some() || self.shared.stopped.load(Ordering::Acquire) {
            tracing::warn!("Idle scheduler already started; ignoring start");
            return self;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Idle scheduler started outside a tokio runtime");
            return self;
        };

        let shared = Arc::clone(&self.shared);
        let callback = Arc::clone(&self.callback);
        let detector = Arc::clone(&self.detector);
        let interval = self.interval;
        let max_idle_wait = self.max_idle_wait;

        self.task = Some(handle.spawn(async move {
            let mut next = Instant::now() + interval;
            loop {
                tokio::time::sleep_until(next).await;
                tokio::select! {
                    () = detector.idle() => {}
                    () = tokio::time::sleep(max_idle_wait) => {
                        tracing::trace!("No idle slice within {:?}; running anyway", max_idle_wait);
                    }
                }
                let started = Instant::now();
                if !shared.invoke(&callback) {
                    break;
                }
                next = started + interval;
            }
        }));
        tracing::debug!("Idle scheduler started with interval {:?}", self.interval);
        self
    }

    /// Cancel all future invocations
    ///
    /// Waits for an invocation already in flight on another thread. No
    /// invocation starts after this returns. Safe to call from inside the
    /// callback and more than once.
    pub fn stop(&mut self) {
        {
            let _gate = self.shared.gate.lock();
            self.shared.stopped.store(true, Ordering::Release);
        }
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(
                "Idle scheduler stopped after {} invocations",
                self.invocations()
            );
        }
    }

    /// Whether invocations are still being scheduled
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.is_some() && !self.shared.stopped.load(Ordering::Acquire)
    }

    /// Number of completed or in-flight invocations
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.shared.invocations.load(Ordering::Relaxed)
    }
}

impl Drop for IdleScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_interval_when_idle() {
        let (count, callback) = counter();
        let scheduler = IdleScheduler::new(callback, Duration::from_millis(100)).start();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.invocations(), 3);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_host_is_bounded_by_max_idle_wait() {
        let (count, callback) = counter();
        let _scheduler = IdleScheduler::new(callback, Duration::from_millis(100))
            .with_max_idle_wait(Duration::from_millis(50))
            .with_detector(Arc::new(NeverIdle))
            .start();

        tokio::time::sleep(Duration::from_millis(140)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Ticks land at 150, 300 and 450
        tokio::time::sleep(Duration::from_millis(360)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn host_idle_signal_releases_pass() {
        let (count, callback) = counter();
        let idle = Arc::new(NotifyIdle::new());
        let _scheduler = IdleScheduler::new(callback, Duration::from_millis(100))
            .with_max_idle_wait(Duration::from_secs(10))
            .with_detector(Arc::clone(&idle) as Arc<dyn IdleDetector>)
            .start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        idle.signal_idle();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_invocation_after_stop() {
        let (count, callback) = counter();
        let mut scheduler = IdleScheduler::new(callback, Duration::from_millis(100)).start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop();
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(!scheduler.is_running());

        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn starts_only_once() {
        let (count, callback) = counter();
        let scheduler = IdleScheduler::new(callback, Duration::from_millis(100))
            .start()
            .start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(scheduler);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_from_inside_callback() {
        let slot: Arc<parking_lot::Mutex<Option<IdleScheduler>>> = Arc::default();
        let inner = Arc::clone(&slot);
        let scheduler = IdleScheduler::new(
            move || {
                if let Some(scheduler) = inner.lock().as_mut() {
                    scheduler.stop();
                }
            },
            Duration::from_millis(100),
        )
        .start();
        *slot.lock() = Some(scheduler);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let guard = slot.lock();
        let scheduler = guard.as_ref().unwrap();
        assert_eq!(scheduler.invocations(), 1);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn start_outside_runtime_is_inert() {
        let (_, callback) = counter();
        let scheduler = IdleScheduler::new(callback, Duration::from_millis(10)).start();
        assert!(!scheduler.is_running());
    }
}
