//! Forced interleaving of concurrent scopes
//!
//! Concurrency bugs in read-modify-write code only show up when two callers
//! both read before either writes. This module makes that schedule
//! deterministic: every participant blocks on a shared barrier right after its
//! first read, so all reads happen before any write. A read that fails still
//! counts as arriving.
//!
//! # Architecture
//!
//! ```text
//! Interleaved<M: Transact>          (one per participant)
//!     └── transact(work)
//!         └── M::transact
//!             └── work(InterleavedStore)
//!                 ├── find  -> inner.find, then InterleaveGate::wait (once, even on error)
//!                 └── other -> inner
//! ```
//!
//! The one-shot flag lives in the participant, not the scope, so a scope
//! retried after a conflict does not wait on a barrier its peers have left.

use crate::core::traits::{EntityStore, Transact};
use crate::types::{StoreError, User, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

/// Barrier shared by all participants of one interleaving
#[derive(Debug, Clone)]
pub struct InterleaveGate {
    barrier: Arc<Barrier>,
}

impl InterleaveGate {
    /// Create a gate that releases once `participants` callers have arrived
    pub fn new(participants: usize) -> Self {
        Self {
            barrier: Arc::new(Barrier::new(participants)),
        }
    }

    /// Signal "read complete" and block until every participant has too
    pub fn wait(&self) {
        self.barrier.wait();
    }
}

/// Store decorator that waits on the gate after its first `find`
pub struct InterleavedStore<'s> {
    inner: &'s dyn EntityStore,
    gate: &'s InterleaveGate,
    armed: &'s AtomicBool,
}

impl<'s> InterleavedStore<'s> {
    /// Wrap `inner`; the wait happens only while `armed` is set and clears it
    pub fn new(
        inner: &'s dyn EntityStore,
        gate: &'s InterleaveGate,
        armed: &'s AtomicBool,
    ) -> Self {
        Self { inner, gate, armed }
    }
}

impl EntityStore for InterleavedStore<'_> {
    fn find(&self, id: UserId) -> Result<User, StoreError> {
        let result = self.inner.find(id);
        // A failed read still arrives, or its peers would wait forever.
        if self.armed.swap(false, Ordering::SeqCst) {
            tracing::debug!(user = id, ok = result.is_ok(), "read complete, waiting for peers");
            self.gate.wait();
        }
        result
    }

    fn create(&self, user: &mut User) -> Result<(), StoreError> {
        self.inner.create(user)
    }

    fn update(&self, user: &User) -> Result<(), StoreError> {
        self.inner.update(user)
    }

    fn delete(&self, id: UserId) -> Result<(), StoreError> {
        self.inner.delete(id)
    }
}

/// [`Transact`] decorator for one participant
///
/// Every scope it runs sees an [`InterleavedStore`], so unchanged production
/// code such as `spend` runs under the forced schedule.
#[derive(Debug)]
pub struct Interleaved<M> {
    inner: M,
    gate: InterleaveGate,
    armed: AtomicBool,
}

impl<M> Interleaved<M> {
    /// Create an armed participant
    pub fn new(inner: M, gate: InterleaveGate) -> Self {
        Self {
            inner,
            gate,
            armed: AtomicBool::new(true),
        }
    }

    /// Whether this participant has not reached the gate yet
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl<M: Transact> Transact for Interleaved<M> {
    fn transact<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn EntityStore) -> Result<T, StoreError>,
    {
        self.inner.transact(|scope| {
            let store = InterleavedStore::new(scope, &self.gate, &self.armed);
            work(&store)
        })
    }
}
