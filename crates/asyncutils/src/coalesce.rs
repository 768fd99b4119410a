//! Per-key coalescing of in-flight futures.
//!
//! [`Coalesce`] guarantees that at most one future runs per key at any time.
//! A caller asking for a key that already has a future in flight receives a
//! handle to that same future and observes the same output, instead of
//! starting a second one. Once the future resolves its entry is dropped, so
//! the next request for that key starts fresh.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use pin_project_lite::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

/// Handle to a coalesced future. Cloneable; every clone resolves to the same
/// output.
pub type Flight<T> = Shared<BoxFuture<'static, T>>;

type FlightMap<K, T> = Mutex<HashMap<K, (u64, Flight<T>)>>;

/// Map of in-flight futures keyed by `K`.
///
/// # Examples
///
/// ```
/// use todosync_asyncutils::Coalesce;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights: Coalesce<&str, u32> = Coalesce::new();
/// let first = flights.run("todo.txt", || async { 42 });
/// // Still in flight: the second factory is never called.
/// let second = flights.run("todo.txt", || async { 0 });
/// assert_eq!((first.await, second.await), (42, 42));
/// # }
/// ```
pub struct Coalesce<K, T> {
    inflight: Arc<FlightMap<K, T>>,
    next_id: AtomicU64,
}

impl<K, T> Coalesce<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the flight for `key`, or start one with `make` if there is none.
    ///
    /// `make` is only invoked when no future is currently in flight for the
    /// key. The returned future is lazy like any other: the work only
    /// progresses while at least one handle is being polled.
    pub fn run<F, Fut>(&self, key: K, make: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut inflight = lock(&self.inflight);
        if let Some((_, flight)) = inflight.get(&key) {
            return flight.clone();
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let release = Release {
            inner: make(),
            map: Arc::downgrade(&self.inflight),
            key: Some(key.clone()),
            id,
        };
        let flight = release.boxed().shared();
        inflight.insert(key, (id, flight.clone()));
        flight
    }

    /// Whether a future is currently in flight for `key`.
    pub fn is_running(&self, key: &K) -> bool {
        lock(&self.inflight).contains_key(key)
    }

    /// Number of keys with a future in flight.
    pub fn len(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T> Default for Coalesce<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// The map only ever holds plain data, a panic while holding the lock can't
// leave it in a half-updated state worth refusing to read.
fn lock<K, T>(map: &FlightMap<K, T>) -> MutexGuard<'_, HashMap<K, (u64, Flight<T>)>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

pin_project! {
    /// Wraps the coalesced future and removes its own map entry on
    /// completion. The id check stops a finished flight from evicting a newer
    /// flight that was registered under the same key.
    struct Release<Fut, K, T> {
        #[pin]
        inner: Fut,
        map: Weak<FlightMap<K, T>>,
        key: Option<K>,
        id: u64,
    }
}

impl<Fut, K, T> Future for Release<Fut, K, T>
where
    Fut: Future<Output = T>,
    K: Eq + Hash,
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = match this.inner.poll(cx) {
            Poll::Ready(output) => output,
            Poll::Pending => return Poll::Pending,
        };
        if let (Some(map), Some(key)) = (this.map.upgrade(), this.key.take()) {
            let mut inflight = lock(&map);
            if inflight.get(&key).is_some_and(|(id, _)| *id == *this.id) {
                inflight.remove(&key);
            }
        }
        Poll::Ready(output)
    }
}
