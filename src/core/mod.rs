//! Core business logic module
//!
//! This module contains the transactional entity store:
//! - `traits` - `EntityStore` and `Transact` abstractions
//! - `user_store` - Single-row CRUD over any connection-like handle
//! - `transaction_manager` - Atomic, isolated scopes over a backend
//! - `spend` - The balance decrement operation
//! - `interleave` - Barrier harness that forces concurrent scopes to interleave

pub mod interleave;
pub mod spend;
pub mod traits;
pub mod transaction_manager;
pub mod user_store;

pub use interleave::{InterleaveGate, Interleaved, InterleavedStore};
pub use spend::{debit, spend};
pub use traits::{EntityStore, Transact};
pub use transaction_manager::TransactionManager;
pub use user_store::{ScopedStore, UserStore};
