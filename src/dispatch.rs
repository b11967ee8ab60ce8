//! Bounded dispatcher for outbound inference calls.
//!
//! Every stage that talks to the inference endpoint goes through one
//! [`Dispatcher`] per run. It caps the number of calls in flight, applies the
//! per-call deadline and hands failures straight back to the caller.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::llm::LlmError;

/// Concurrency gate shared by all stages of a run.
///
/// # Invariants
/// - At most `limit` callables are executing at any instant
/// - Waiting callers are suspended, never dropped
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    semaphore: Semaphore,
    limit: usize,
    call_timeout: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the in-flight counter even if the call future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    /// Create a dispatcher allowing `limit` concurrent calls.
    ///
    /// # Preconditions
    /// `limit >= 1` (validated by `Config`); a zero limit is raised to one.
    pub fn new(limit: usize, call_timeout: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Semaphore::new(limit),
                limit,
                call_timeout,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Run one remote call under the gate.
    ///
    /// The deadline covers the call only, not the time spent waiting for a
    /// slot. An elapsed deadline is reported as [`LlmError::timeout`].
    pub async fn run<F, Fut, T>(&self, call: F) -> Result<T, LlmError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let _permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::network_error("dispatcher closed".to_string()))?;

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.inner.in_flight);
        self.inner.peak.fetch_max(now, Ordering::SeqCst);

        match tokio::time::timeout(self.inner.call_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LlmError::timeout(self.inner.call_timeout)),
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed so far.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;
    use futures::future::join_all;

    #[tokio::test]
    async fn never_exceeds_limit_under_load() {
        let dispatcher = Dispatcher::new(5, Duration::from_secs(5));
        let observed = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let calls = (0..200).map(|i| {
            let dispatcher = dispatcher.clone();
            let observed = observed.clone();
            let current = current.clone();
            async move {
                dispatcher
                    .run(|| async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        observed.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1 + (i % 3) as u64)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, LlmError>(i)
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        assert_eq!(results.len(), 200);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(observed.load(Ordering::SeqCst) <= 5);
        assert!(dispatcher.peak_in_flight() <= 5);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn limit_of_one_serializes_calls() {
        let dispatcher = Dispatcher::new(1, Duration::from_secs(5));
        let calls = (0..10).map(|_| {
            let dispatcher = dispatcher.clone();
            async move {
                dispatcher
                    .run(|| async {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        Ok::<_, LlmError>(())
                    })
                    .await
            }
        });
        join_all(calls).await;
        assert_eq!(dispatcher.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn failure_is_returned_not_retried() {
        let dispatcher = Dispatcher::new(2, Duration::from_secs(5));
        let attempts = AtomicUsize::new(0);
        let result: Result<(), LlmError> = dispatcher
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::server_error(503, "unavailable".to_string()))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::ServerError);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_call_times_out_and_releases_slot() {
        let dispatcher = Dispatcher::new(1, Duration::from_millis(20));
        let result: Result<(), LlmError> = dispatcher
            .run(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind, LlmErrorKind::Timeout);
        assert_eq!(dispatcher.in_flight(), 0);

        let next = dispatcher.run(|| async { Ok::<_, LlmError>(7) }).await;
        assert_eq!(next.unwrap(), 7);
    }
}
