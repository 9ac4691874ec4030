//! Transaction manager
//!
//! Wraps a unit of work into one atomic, isolated scope on the backing store.
//!
//! # Design
//!
//! [`TransactionManager::run`] opens a transactional context, binds a
//! [`ScopedStore`] to it and hands that store to the caller's closure exactly
//! once. The closure's result decides the outcome:
//!
//! - `Ok` commits. A failed commit fails the whole call with
//!   `StoreError::Commit` and nothing is durable.
//! - `Err` rolls back and returns the original error. A failed rollback is
//!   attached as secondary context (`StoreError::RollbackFailed`).
//! - A panic drops the context during unwinding, which rolls it back.
//!
//! The manager keeps no state between calls besides its backend handle, so it
//! can be cloned freely and used from any number of threads.
//!
//! # Isolation
//!
//! Lost updates are prevented by the backend: of two overlapping
//! read-modify-write scopes on one row, the later committer fails with
//! `StoreError::Conflict`. Retrying is left to the caller.

use crate::backend::{Backend, TransactionContext};
use crate::core::traits::{EntityStore, Transact};
use crate::core::user_store::{ScopedStore, UserStore};
use crate::types::StoreError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Runs units of work atomically against a shared backend
#[derive(Debug)]
pub struct TransactionManager<B> {
    backend: Arc<B>,
}

impl<B> Clone for TransactionManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: Backend> TransactionManager<B> {
    /// Create a manager over a shared backend
    ///
    /// Logs a warning if the backend's isolation level cannot prevent lost
    /// updates.
    pub fn new(backend: Arc<B>) -> Self {
        let level = backend.isolation_level();
        if !level.prevents_lost_updates() {
            tracing::warn!(
                ?level,
                "backend isolation does not prevent lost updates in read-modify-write scopes"
            );
        }
        Self { backend }
    }

    /// The shared backend
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Non-transactional store: every call is its own statement
    pub fn store(&self) -> UserStore<&B> {
        UserStore::new(&*self.backend)
    }

    /// Run `work` inside one transactional scope
    ///
    /// # Arguments
    ///
    /// * `work` - Closure receiving the scoped store; invoked exactly once
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - `work` succeeded and its effects are committed
    /// * `Err(StoreError)` - nothing from this scope is visible
    ///
    /// # Errors
    ///
    /// - Any error from opening the scope
    /// - The error returned by `work`, or `StoreError::RollbackFailed` if
    ///   rolling back also failed
    /// - `StoreError::Commit` if committing failed
    pub fn run<'m, T, F>(&'m self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&ScopedStore<'_, B::Tx<'m>>) -> Result<T, StoreError>,
    {
        let scope = NEXT_SCOPE.fetch_add(1, Ordering::Relaxed);
        let span = tracing::debug_span!("scope", id = scope);
        let _entered = span.enter();

        let tx = self.backend.begin()?;
        tracing::debug!("scope begun");

        let outcome = {
            let store = UserStore::new(&tx);
            work(&store)
        };

        match outcome {
            Ok(value) => {
                tx.commit().map_err(StoreError::commit)?;
                tracing::debug!("scope committed");
                Ok(value)
            }
            Err(error) => match tx.rollback() {
                Ok(()) => {
                    tracing::debug!(%error, "scope rolled back");
                    Err(error)
                }
                Err(rollback) => {
                    tracing::warn!(%error, %rollback, "rollback failed");
                    Err(StoreError::rollback_failed(error, rollback))
                }
            },
        }
    }
}

impl<B: Backend> Transact for TransactionManager<B> {
    fn transact<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn EntityStore) -> Result<T, StoreError>,
    {
        self.run(|scope| work(scope))
    }
}
