//! Request deduplication (singleflight).
//!
//! Concurrent calls carrying the same key are coalesced: the first caller
//! (the leader) runs the work itself, every later caller waits for
//! the leader's result and receives a clone of it.
//!
//! The in-flight map is only locked while a key is registered or removed.
//! Waiters block on a `watch` channel, raced against their own
//! `CancellationToken`. A cancelled waiter leaves without disturbing the
//! leader or the other waiters. If the leader's future is dropped, or its own
//! token fires and the work fails, nothing is published: the sender closes
//! and the remaining waiters elect a new leader.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::cancel::{or_cancel, Cancelled};

type Slot<T, E> = Option<Result<T, E>>;

struct Flight<T, E> {
    done: watch::Receiver<Slot<T, E>>,
    waiters: AtomicUsize,
}

enum Role<T, E> {
    Leader(Arc<Flight<T, E>>, watch::Sender<Slot<T, E>>),
    Waiter(Arc<Flight<T, E>>),
}

/// Coalesces concurrent identical calls into one execution.
pub struct RequestDeduplicator<T, E> {
    name: String,
    in_flight: DashMap<String, Arc<Flight<T, E>>>,
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + From<Cancelled> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_flight: DashMap::new(),
        }
    }

    /// Run `work` for `key`, or join the call already in flight for it.
    ///
    /// Returns the result and whether it was shared from another caller's
    /// execution. A waiter whose token fires gets `Cancelled` and `false`.
    pub async fn run<F, Fut>(&self, cancel: &CancellationToken, key: &str, work: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (flight, done) = loop {
            match self.join(key) {
                Role::Leader(flight, done) => break (flight, done),
                Role::Waiter(flight) => {
                    let mut rx = flight.done.clone();
                    let waited = or_cancel(cancel, rx.wait_for(Option::is_some))
                        .await
                        .map(|changed| changed.ok().and_then(|slot| slot.clone()));
                    match waited {
                        Err(cancelled) => {
                            tracing::debug!(dedup = %self.name, key = %key, "Waiter cancelled");
                            return (Err(E::from(cancelled)), false);
                        }
                        Ok(Some(result)) => {
                            metrics::record_dedup_shared(&self.name);
                            return (result, true);
                        }
                        // Leader dropped without publishing; compete again.
                        Ok(None) => continue,
                    }
                }
            }
        };

        let _registration = Registration {
            map: &self.in_flight,
            key,
            flight: &flight,
        };
        let result = work().await;
        if result.is_err() && cancel.is_cancelled() {
            // The failure belongs to this caller's token; closing the flight
            // unpublished makes live waiters elect a new leader.
            tracing::debug!(dedup = %self.name, key = %key, "Leader cancelled, handing over");
            return (result, false);
        }
        done.send_replace(Some(result.clone()));

        let waiters = flight.waiters.load(Ordering::Acquire);
        if waiters > 0 {
            tracing::debug!(dedup = %self.name, key = %key, waiters, "Released coalesced waiters");
        }
        (result, false)
    }

    /// Number of distinct keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn join(&self, key: &str) -> Role<T, E> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let flight = entry.get().clone();
                flight.waiters.fetch_add(1, Ordering::AcqRel);
                Role::Waiter(flight)
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                let flight = Arc::new(Flight {
                    done: rx,
                    waiters: AtomicUsize::new(0),
                });
                entry.insert(flight.clone());
                Role::Leader(flight, tx)
            }
        }
    }
}

/// Removes the leader's map entry when the call completes or is dropped.
struct Registration<'a, T, E> {
    map: &'a DashMap<String, Arc<Flight<T, E>>>,
    key: &'a str,
    flight: &'a Arc<Flight<T, E>>,
}

impl<T, E> Drop for Registration<'_, T, E> {
    fn drop(&mut self) {
        self.map
            .remove_if(self.key, |_, current| Arc::ptr_eq(current, self.flight));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Cancelled,
        Boom(String),
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    type Dedup = RequestDeduplicator<String, TestError>;

    #[tokio::test]
    async fn test_concurrent_same_key_runs_once() {
        let dedup = Arc::new(Dedup::new("test"));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedup = dedup.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup
                    .run(&token, "company:123", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("acme".to_string())
                    })
                    .await
            }));
        }

        let mut shared = 0;
        for handle in handles {
            let (result, was_shared) = handle.await.unwrap();
            assert_eq!(result, Ok("acme".to_string()));
            if was_shared {
                shared += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared, 9);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let dedup = Arc::new(Dedup::new("test"));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let dedup = dedup.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                let key = format!("company:{i}");
                dedup
                    .run(&token, &key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(format!("value-{i}"))
                    })
                    .await
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let (result, was_shared) = handle.await.unwrap();
            assert_eq!(result, Ok(format!("value-{i}")));
            assert!(!was_shared);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_error_is_shared() {
        let dedup = Arc::new(Dedup::new("test"));

        let leader = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup
                    .run(&token, "k", || async {
                        tokio::time::sleep(Duration::from_millis(80)).await;
                        Err(TestError::Boom("upstream down".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let token = CancellationToken::new();
        let (result, was_shared) = dedup
            .run(&token, "k", || async { Ok("never runs".to_string()) })
            .await;
        assert!(was_shared);
        assert_eq!(result, Err(TestError::Boom("upstream down".into())));

        let (leader_result, leader_shared) = leader.await.unwrap();
        assert!(!leader_shared);
        assert_eq!(leader_result, result);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_isolated() {
        let dedup = Arc::new(Dedup::new("test"));

        let leader = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup
                    .run(&token, "k", || async {
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok("done".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let patient = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup.run(&token, "k", || async { Ok("unused".to_string()) }).await
            })
        };

        let impatient_token = CancellationToken::new();
        let trigger = impatient_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let (result, was_shared) = dedup
            .run(&impatient_token, "k", || async { Ok("unused".to_string()) })
            .await;
        assert_eq!(result, Err(TestError::Cancelled));
        assert!(!was_shared);
        assert!(started.elapsed() < Duration::from_millis(120));

        let (result, was_shared) = patient.await.unwrap();
        assert_eq!(result, Ok("done".to_string()));
        assert!(was_shared);

        let (result, _) = leader.await.unwrap();
        assert_eq!(result, Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_abandoned_leader_hands_over() {
        let dedup = Arc::new(Dedup::new("test"));

        let leader = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup
                    .run(&token, "k", || async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok("stale".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup.run(&token, "k", || async { Ok("fresh".to_string()) }).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let (result, was_shared) = waiter.await.unwrap();
        assert_eq!(result, Ok("fresh".to_string()));
        assert!(!was_shared);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_leader_hands_over_to_live_waiter() {
        let dedup = Arc::new(Dedup::new("test"));
        let leader_token = CancellationToken::new();

        let leader = {
            let dedup = dedup.clone();
            let token = leader_token.clone();
            tokio::spawn(async move {
                dedup
                    .run(&token, "k", || async {
                        match or_cancel(&token, tokio::time::sleep(Duration::from_secs(10))).await {
                            Ok(()) => Ok("stale".to_string()),
                            Err(cancelled) => Err(TestError::from(cancelled)),
                        }
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let dedup = dedup.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                dedup.run(&token, "k", || async { Ok("fresh".to_string()) }).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader_token.cancel();
        let (result, was_shared) = leader.await.unwrap();
        assert_eq!(result, Err(TestError::Cancelled));
        assert!(!was_shared);

        let (result, was_shared) = waiter.await.unwrap();
        assert_eq!(result, Ok("fresh".to_string()));
        assert!(!was_shared);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_are_not_shared() {
        let dedup = Dedup::new("test");
        let token = CancellationToken::new();

        let (first, shared) = dedup.run(&token, "k", || async { Ok("1".to_string()) }).await;
        assert_eq!(first, Ok("1".to_string()));
        assert!(!shared);

        let (second, shared) = dedup.run(&token, "k", || async { Ok("2".to_string()) }).await;
        assert_eq!(second, Ok("2".to_string()));
        assert!(!shared);
    }
}
