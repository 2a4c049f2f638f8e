//! Deferred side effects and the shutdown counter they report to.
//!
//! A task handed to [`BackgroundRunner::run`] is counted on a
//! [`ShutdownTracker`] before the call returns, so an orderly shutdown that
//! awaits [`ShutdownTracker::wait`] cannot miss it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Counter of in-flight deferred tasks.
#[derive(Debug, Default)]
pub struct ShutdownTracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl ShutdownTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn done(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Count one task until the returned guard is dropped.
    pub fn guard(self: &Arc<Self>) -> TaskGuard {
        self.add();
        TaskGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once the counter is zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a `done` in between is not lost.
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements its tracker on drop, panics included.
#[derive(Debug)]
pub struct TaskGuard {
    tracker: Arc<ShutdownTracker>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker.done();
    }
}

/// Fire-and-forget executor for non-critical side effects.
#[derive(Debug, Clone)]
pub struct BackgroundRunner {
    tracker: Arc<ShutdownTracker>,
}

impl BackgroundRunner {
    pub fn new(tracker: Arc<ShutdownTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<ShutdownTracker> {
        &self.tracker
    }

    /// Spawn `task` on the runtime and return immediately.
    ///
    /// The caller never observes the outcome. Errors and panics inside the task
    /// are logged under `name`. Must be called from within a tokio runtime.
    pub fn run<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = self.tracker.guard();
        let inner = tokio::spawn(task);

        tokio::spawn(async move {
            let _guard = guard;
            match inner.await {
                Ok(Ok(())) => debug!(task = name, "background task finished"),
                Ok(Err(e)) => error!(task = name, error = %e, "background task failed"),
                Err(join) if join.is_panic() => {
                    let payload = join.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(task = name, panic = %message, "background task panicked");
                }
                Err(join) => warn!(task = name, error = %join, "background task cancelled"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_idle() {
        let tracker = ShutdownTracker::new();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_blocks_until_every_task_is_done() {
        let tracker = ShutdownTracker::new();
        let runner = BackgroundRunner::new(Arc::clone(&tracker));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        runner.run("gated", async move {
            let _ = gate.await;
            Ok(())
        });
        assert_eq!(tracker.in_flight(), 1);

        assert!(
            tokio::time::timeout(Duration::from_millis(50), tracker.wait())
                .await
                .is_err()
        );

        release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn failing_and_panicking_tasks_are_contained() {
        let tracker = ShutdownTracker::new();
        let runner = BackgroundRunner::new(Arc::clone(&tracker));

        runner.run("fails", async { Err(anyhow::anyhow!("smtp unreachable")) });
        let explode = true;
        runner.run("panics", async move {
            assert!(!explode, "template exploded");
            Ok(())
        });

        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .unwrap();
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_guards_balance_out() {
        let tracker = ShutdownTracker::new();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                let _g = tracker.guard();
                tokio::task::yield_now().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(tracker.in_flight(), 0);
    }
}
