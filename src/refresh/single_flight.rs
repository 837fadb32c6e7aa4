//! At most one in-flight operation per key.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::{Error, Result};

type Flight<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Deduplicates concurrent operations by key.
///
/// The first caller for a key starts the operation on its own task; later
/// callers await the same result. Dropping a waiter never cancels the
/// operation. The key is released when the operation finishes, successfully
/// or not, so the next call starts fresh.
pub struct SingleFlight<K, T> {
    inflight: Arc<DashMap<K, Flight<T>>>,
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }
}

struct Release<K: Eq + Hash, T> {
    inflight: Arc<DashMap<K, Flight<T>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, T> Drop for Release<K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.remove(&key);
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` unless an operation for `key` is already in flight, and
    /// return the shared result.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let flight = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = oneshot::channel();
                let flight: Flight<T> = async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(Error::Internal("in-flight operation panicked".to_string()))
                    })
                }
                .boxed()
                .shared();
                entry.insert(flight.clone());

                let release = Release {
                    inflight: self.inflight.clone(),
                    key: Some(key),
                };
                let work = start();
                tokio::spawn(async move {
                    let result = work.await;
                    // Release before publishing so a caller that saw the
                    // result can start a new flight
                    drop(release);
                    let _ = tx.send(result);
                });
                flight
            }
        };
        flight.await
    }

    /// Whether an operation for `key` is running.
    pub fn is_running(&self, key: &K) -> bool {
        self.inflight.contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<&'static str, usize>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("EMPLOYEES", || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_releases_key() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let first = flights
            .run(1, || async { Err(Error::NotFound("HR.GONE".into())) })
            .await;
        assert!(first.is_err());
        let second = flights.run(1, || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_cancel_work() {
        let flights: Arc<SingleFlight<u32, u32>> = Arc::new(SingleFlight::new());
        let done = Arc::new(AtomicUsize::new(0));

        let marker = done.clone();
        let waiter = flights.run(1, || async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            marker.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });
        // Give up almost immediately
        let timed_out = tokio::time::timeout(Duration::from_millis(1), waiter).await;
        assert!(timed_out.is_err());

        // A late joiner still gets the original result
        let joined = flights.run(1, || async { Ok(2) }).await;
        assert_eq!(joined, Ok(1));
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_work_reports_internal_error() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let result = flights
            .run(9, || async {
                if true {
                    panic!("boom");
                }
                Ok(0)
            })
            .await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(!flights.is_running(&9));
    }
}
