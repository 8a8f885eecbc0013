//! Single-shot timers that can be cancelled before they fire.
//!
//! Every timer is a spawned tokio task sleeping until its deadline. The task
//! and the [`TimerHandle`] race on a shared state word: whichever moves it out
//! of `PENDING` first wins, so a cancelled timer never runs its callback and a
//! fired timer is never aborted halfway through.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct TimerService {
    outstanding: Arc<AtomicUsize>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once `delay` has elapsed, unless the returned handle is
    /// cancelled first. Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let state = Arc::new(AtomicU8::new(PENDING));
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        let fire_state = state.clone();
        let outstanding = self.outstanding.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if fire_state
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                outstanding.fetch_sub(1, Ordering::SeqCst);
                callback.await;
            }
        });

        TimerHandle {
            state,
            outstanding: self.outstanding.clone(),
            task: task.abort_handle(),
            deadline,
        }
    }

    /// Timers scheduled through this service that have neither fired nor been cancelled.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
    outstanding: Arc<AtomicUsize>,
    task: AbortHandle,
    deadline: Instant,
}

impl TimerHandle {
    /// Returns `true` if this call prevented the callback from running.
    /// Cancelling a timer that already fired or was already cancelled is a no-op.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            self.task.abort();
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn flag() -> (Arc<AtomicBool>, impl Future<Output = ()> + Send + 'static) {
        let fired = Arc::new(AtomicBool::new(false));
        let setter = fired.clone();
        (fired, async move {
            setter.store(true, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let timers = TimerService::new();
        let (fired, callback) = flag();
        let handle = timers.schedule(Duration::from_secs(10), callback);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(handle.is_pending());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(handle.has_fired());
        assert_eq!(timers.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let timers = TimerService::new();
        let (fired, callback) = flag();
        let handle = timers.schedule(Duration::from_secs(5), callback);
        assert_eq!(timers.outstanding(), 1);

        assert!(handle.cancel());
        assert_eq!(timers.outstanding(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!handle.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_a_noop_once_fired_or_cancelled() {
        let timers = TimerService::new();
        let (_, callback) = flag();
        let fired = timers.schedule(Duration::from_millis(10), callback);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.cancel());
        assert!(fired.has_fired());

        let (_, callback) = flag();
        let cancelled = timers.schedule(Duration::from_millis(10), callback);
        assert!(cancelled.cancel());
        assert!(!cancelled.cancel());
        assert_eq!(timers.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_fixed_at_schedule_time() {
        let timers = TimerService::new();
        let before = Instant::now();
        let handle = timers.schedule(Duration::from_secs(3), async {});
        assert_eq!(handle.deadline(), before + Duration::from_secs(3));
        handle.cancel();
    }
}
