//! Long-press timer
//!
//! Cancellation is best effort: an aborted task that has already started
//! running its callback still completes. The callback must re-check the
//! machine state under its lock and treat a fire for a superseded press as
//! a no-op.

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A pending long-press callback for one hotkey press
#[derive(Debug)]
pub struct LongPressTimer {
    task: JoinHandle<()>,
}

impl LongPressTimer {
    /// Run `on_fire` on `runtime` once `deadline` is reached
    pub fn arm<F>(runtime: &Handle, deadline: Instant, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_fire();
        });
        Self { task }
    }

    /// Request cancellation. Safe after the timer has fired.
    pub fn cancel(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let deadline = Instant::now() + Duration::from_millis(200);

        let _timer = LongPressTimer::arm(&Handle::current(), deadline, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let deadline = Instant::now() + Duration::from_millis(200);

        let timer = LongPressTimer::arm(&Handle::current(), deadline, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let deadline = Instant::now() + Duration::from_millis(10);

        let timer = LongPressTimer::arm(&Handle::current(), deadline, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        timer.cancel();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
