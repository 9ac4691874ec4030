//! Concurrent batch processing of spend requests
//!
//! This module provides the `BatchProcessor`, which applies a batch of spend
//! requests with a bounded number of scopes in flight at once.
//!
//! # Design
//!
//! Each request runs `spend` inside its own scope on a blocking worker thread
//! (the backends are synchronous). Requests for the same user may run
//! concurrently: the transaction manager guarantees that no decrement is
//! lost, and the processor retries the scopes that lose a commit race.
//! Completion order is not input order.
//!
//! # Architecture
//!
//! ```text
//! BatchProcessor
//!     ├── TransactionManager<B>  (shared, cheap to clone)
//!     ├── RetryPolicy            (conflict retries per request)
//!     └── max_concurrent         (scopes in flight)
//! ```

use crate::backend::Backend;
use crate::core::{spend, TransactionManager};
use crate::strategy::retry::{retry_on_conflict, RetryPolicy};
use crate::types::{SpendRequest, StoreError};
use futures::stream::{self, StreamExt};

/// Result of applying a single spend request
#[derive(Debug, Clone)]
pub struct SpendOutcome {
    /// The request that was applied
    pub request: SpendRequest,

    /// The result of the spend after retries
    pub result: Result<(), StoreError>,
}

/// Applies batches of spend requests concurrently
#[derive(Debug)]
pub struct BatchProcessor<B> {
    manager: TransactionManager<B>,
    retry: RetryPolicy,
    max_concurrent: usize,
}

impl<B> Clone for BatchProcessor<B> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            retry: self.retry,
            max_concurrent: self.max_concurrent,
        }
    }
}

impl<B: Backend + 'static> BatchProcessor<B> {
    /// Create a new BatchProcessor
    ///
    /// # Arguments
    ///
    /// * `manager` - Transaction manager every spend runs through
    /// * `retry` - Retry policy for conflicting scopes
    /// * `max_concurrent` - Maximum number of scopes in flight (at least 1)
    pub fn new(manager: TransactionManager<B>, retry: RetryPolicy, max_concurrent: usize) -> Self {
        Self {
            manager,
            retry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Apply one request, retrying on conflict
    pub fn apply(&self, request: SpendRequest) -> SpendOutcome {
        let result = retry_on_conflict(&self.retry, || {
            spend(&self.manager, request.user, request.amount)
        });
        SpendOutcome { request, result }
    }

    /// Apply a batch with up to `max_concurrent` requests in flight
    ///
    /// # Returns
    ///
    /// One outcome per request whose worker completed, in completion order.
    /// A worker that panicked is logged and has no outcome.
    pub async fn process_batch(&self, batch: Vec<SpendRequest>) -> Vec<SpendOutcome> {
        let results: Vec<_> = stream::iter(batch)
            .map(|request| {
                let processor = self.clone();
                tokio::task::spawn_blocking(move || processor.apply(request))
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!("Spend worker failed: {}", e);
                    None
                }
            })
            .collect()
    }
}
