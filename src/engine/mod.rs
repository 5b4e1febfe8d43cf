//! Allocation engine: picks the least-loaded doctor in a specialization and
//! consumes one of their daily slots.
//!
//! The engine keeps no mutable state and takes no locks. Capacity safety rests
//! entirely on [`ResourceStore::conditional_increment`], which the store must
//! implement as a single indivisible check-and-increment. The candidate read
//! that precedes it is only a hint.

mod allocation;
mod error;
mod summary;
#[cfg(test)]
mod tests;

pub use allocation::select_least_loaded;
pub use error::{EngineError, FailureReason, StoreError};
pub use summary::summarize_resources;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::Resource;

/// What the engine needs from the registry that owns the doctors.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Resources whose category equals `category`, compared case-insensitively
    /// over the whole string.
    async fn find_by_category(&self, category: &str) -> Result<Vec<Resource>, StoreError>;

    /// Atomically `used += 1` iff `used < capacity` at commit time.
    /// `Ok(None)` means the condition did not hold (or `id` is unknown).
    async fn conditional_increment(&self, id: &str) -> Result<Option<Resource>, StoreError>;

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError>;
}

#[async_trait]
impl<T: ResourceStore + ?Sized> ResourceStore for Arc<T> {
    async fn find_by_category(&self, category: &str) -> Result<Vec<Resource>, StoreError> {
        (**self).find_by_category(category).await
    }

    async fn conditional_increment(&self, id: &str) -> Result<Option<Resource>, StoreError> {
        (**self).conditional_increment(id).await
    }

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError> {
        (**self).read_all().await
    }
}

pub struct AllocationEngine<S> {
    store: S,
    store_timeout: Option<Duration>,
}

impl<S: ResourceStore> AllocationEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            store_timeout: None,
        }
    }

    /// Bound every store call. An elapsed bound surfaces as `StoreError::Timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub(super) async fn call_store<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, op)
                .await
                .map_err(|_| StoreError::Timeout)?,
            None => op.await,
        }
    }
}
