//! Cached provider client handles.

use crate::error::{ErrorKind, Result};
use std::future::Future;
use tokio::sync::Mutex;

/// Explicit cache for an adapter's short-lived client handle (access token,
/// authenticated base URL, ...).
///
/// Creating a client is comparatively expensive (token refresh, credential
/// lookups), so adapters build it once and reuse it until a request is
/// rejected as unauthorized. At that point the adapter must call
/// [`invalidate`](Self::invalidate) (or route the result through
/// [`check`](Self::check)) so the next request rebuilds the client from
/// stored credentials.
#[derive(Debug)]
pub struct ClientCache<C> {
    slot: Mutex<Option<C>>,
}

impl<C: Clone> ClientCache<C> {
    pub fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    /// Return the cached client or build one with `init`.
    ///
    /// Concurrent callers wait for the same initialization instead of each
    /// refreshing a token. A failed `init` leaves the cache empty.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<C>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = init().await?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Replace the cached client (after an interactive login, for example).
    pub async fn set(&self, client: C) {
        *self.slot.lock().await = Some(client);
    }

    pub async fn invalidate(&self) {
        if self.slot.lock().await.take().is_some() {
            tracing::debug!("invalidated cached provider client");
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Pass `result` through, dropping the cached client first if it failed
    /// with [`Unauthorized`](ErrorKind::Unauthorized).
    pub async fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result
            && matches!(&**err, ErrorKind::Unauthorized(_))
        {
            self.invalidate().await;
        }
        result
    }
}

impl<C: Clone> Default for ClientCache<C> {
    fn default() -> Self {
        Self::new()
    }
}
