//! Rust User Ledger Library
//! # Overview
//!
//! This library provides a transactional entity store: single-row CRUD over
//! users, plus a transaction manager that runs multi-step read-modify-write
//! sequences atomically and safely under concurrent callers.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (User, SpendRequest, StoreError)
//! - [`backend`] - Backing store capabilities and the SQLite / in-memory adapters
//! - [`core`] - Business logic components:
//!   - [`core::user_store`] - Find, create, update, delete by id
//!   - [`core::transaction_manager`] - Atomic, isolated scopes
//!   - [`core::spend`] - Balance decrement inside a scope
//!   - [`core::interleave`] - Barrier harness that forces scopes to interleave
//! - [`io`] - CSV readers and writers
//! - [`strategy`] - Sequential and concurrent spend batch processing with retries
//! - [`cli`] - CLI arguments parsing and commands
//!
//! # Consistency
//!
//! Of two overlapping `spend` scopes on one user, the later committer fails
//! with a retryable `StoreError::Conflict` and leaves no trace. Retrying it
//! reads the committed balance, so no decrement is ever lost:
//!
//! ```
//! use rust_user_ledger::backend::MemoryBackend;
//! use rust_user_ledger::core::{spend, EntityStore, TransactionManager};
//! use rust_user_ledger::User;
//! use std::sync::Arc;
//!
//! let manager = TransactionManager::new(Arc::new(MemoryBackend::new()));
//! let mut user = User::new("Alice", "alice@example.com", 100);
//! manager.store().create(&mut user).unwrap();
//!
//! spend(&manager, user.id, 20).unwrap();
//! assert_eq!(manager.store().find(user.id).unwrap().balance, 80);
//! ```

// Module declarations
pub mod backend;
pub mod cli;
pub mod core;
pub mod io;
pub mod strategy;
pub mod types;

pub use core::{spend, EntityStore, Transact, TransactionManager, UserStore};
pub use io::write_users_csv;
pub use types::{Amount, SpendRequest, StoreError, User, UserId};
