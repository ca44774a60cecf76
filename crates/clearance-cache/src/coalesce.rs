//! Single-flight coalescing per scoped key
//!
//! Concurrent misses on the same key share one computation. The entry is
//! dropped once the computation finishes, so nothing is remembered beyond the
//! flight itself; a failed result reaches only the callers that were already
//! waiting on it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Coalesces concurrent computations by key.
pub struct SingleFlight<T> {
    flights: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `key` unless a flight for `key` is already running,
    /// in which case wait for it and share its result.
    ///
    /// If the leading caller is cancelled, a waiting caller takes over.
    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = self
            .flights
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let value = cell.get_or_init(compute).await.clone();

        let mut flights = self.flights.lock();
        if flights.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            flights.remove(key);
        }
        value
    }

    /// Keys with a flight in progress.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let flight = SingleFlight::<u32>::new();
        let calls = AtomicUsize::new(0);
        let gate = Notify::new();
        let (calls, gate) = (&calls, &gate);

        let leader = flight.run("k", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            7
        });
        let follower = flight.run("k", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            8
        });
        let release = async {
            tokio::task::yield_now().await;
            gate.notify_one();
        };

        let (a, b, ()) = tokio::join!(leader, follower, release);
        assert_eq!((a, b), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn sequential_callers_recompute() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run("k", || async { 1 }).await, 1);
        assert_eq!(flight.run("k", || async { 2 }).await, 2);
        assert_eq!(flight.run("other", || async { 3 }).await, 3);
    }
}
