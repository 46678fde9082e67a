//! General utilities for the bridge.

use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::error::Error;

/// A client that holds one inner client per endpoint and moves on to the
/// next endpoint whenever a request fails.
#[derive(Debug)]
pub struct ApiFallbackClient<T> {
    inner: Arc<InnerApiFallbackClient<T>>,
}

impl<T> Clone for ApiFallbackClient<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Deref for ApiFallbackClient<T> {
    type Target = InnerApiFallbackClient<T>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The shared state of an [`ApiFallbackClient`].
#[derive(Debug)]
pub struct InnerApiFallbackClient<T> {
    inner_clients: Vec<T>,
    last_client_index: AtomicUsize,
}

impl<T> InnerApiFallbackClient<T> {
    /// Get a reference to the current inner API client.
    pub fn get_client(&self) -> &T {
        &self.inner_clients[self.last_client_index.load(Ordering::Relaxed)]
    }

    /// Run `f` against the current client. On failure the next request
    /// goes to the next client.
    pub async fn exec<'a, R, F>(&'a self, f: impl Fn(&'a T) -> F) -> Result<R, Error>
    where
        F: Future<Output = Result<R, Error>> + 'a,
    {
        let client_index = self.last_client_index.load(Ordering::Relaxed);
        let result = f(&self.inner_clients[client_index]).await;

        if let Err(error) = result.as_ref() {
            let next = (client_index + 1) % self.inner_clients.len();
            if next != client_index {
                tracing::debug!(%error, client_index, next, "request failed, switching client");
            }
            self.last_client_index.store(next, Ordering::Relaxed);
        }

        result
    }
}

impl<T> ApiFallbackClient<T> {
    /// Create a new API client with one inner client per endpoint. Fails
    /// when `clients` is empty.
    pub fn from_clients(clients: Vec<T>) -> Result<Self, Error> {
        if clients.is_empty() {
            return Err(Error::EmptyEndpoints("api fallback client"));
        }

        let inner = InnerApiFallbackClient {
            inner_clients: clients,
            last_client_index: AtomicUsize::new(0),
        };

        Ok(Self { inner: Arc::new(inner) })
    }
}
