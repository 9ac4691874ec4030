//! Backing store abstraction
//!
//! The entity store and the transaction manager never name a concrete database.
//! They depend on three capabilities only:
//!
//! - query a single row ([`Connection::query_row`])
//! - execute a single-row statement ([`Connection::execute`])
//! - begin a transactional context ([`Backend::begin`])
//!
//! Two adapters implement them:
//!
//! - [`SqliteBackend`] - persistent storage in a SQLite database file
//! - [`MemoryBackend`] - in-process storage for tests and demos
//!
//! # Invariants
//!
//! - A [`TransactionContext`] is finalized exactly once: `commit`, `rollback`,
//!   or drop (which rolls back).
//! - Effects of a context are invisible to every other context and to
//!   non-transactional readers until `commit` returns `Ok`.
//! - A context is `!Sync` and is only ever used by one thread at a time.

use crate::types::{Amount, StoreError, User, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryBackend, MemoryTransaction};
pub use sqlite::{SqliteBackend, SqliteTransaction};

/// Single-row lookups understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// `SELECT id, name, email, balance FROM users WHERE id = ?`
    UserById(UserId),
}

/// Single-row mutations understood by every backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Insert a new user; the backend generates the id
    InsertUser {
        name: String,
        email: String,
        balance: Amount,
    },
    /// Overwrite name, email and balance of the row with `user.id`
    UpdateUser(User),
    /// Remove the row with this id
    DeleteUser(UserId),
}

/// Outcome of [`Connection::execute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Number of rows the statement touched
    pub rows_affected: u64,
    /// Generated id for inserts
    pub last_insert_id: Option<UserId>,
}

/// Isolation level a backend provides to its transactional contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Sees only committed data, but a read-modify-write can lose updates
    ReadCommitted,
    /// Rows read stay stable for the scope
    RepeatableRead,
    /// Every committed outcome matches some serial order of the scopes
    Serializable,
}

impl IsolationLevel {
    /// Whether two overlapping read-modify-write scopes on one row can both commit
    pub fn prevents_lost_updates(self) -> bool {
        !matches!(self, IsolationLevel::ReadCommitted)
    }
}

/// A handle that can run single-row queries and statements
///
/// Implemented by backends (autocommit, one statement at a time) and by their
/// transactional contexts (statements join the open scope).
pub trait Connection {
    /// Look up at most one row
    ///
    /// Returns `Ok(None)` when nothing matches.
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError>;

    /// Execute one statement
    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError>;
}

/// A transactional scope opened by [`Backend::begin`]
///
/// Dropping a context without calling `commit` rolls it back, so a scope is
/// finalized on every exit path including unwinding.
pub trait TransactionContext: Connection {
    /// Make every effect of the scope durable and visible
    fn commit(self) -> Result<(), StoreError>;

    /// Discard every effect of the scope
    fn rollback(self) -> Result<(), StoreError>;
}

/// A shared backing store
pub trait Backend: Connection + Send + Sync {
    /// Transactional context type, borrowing the backend
    type Tx<'a>: TransactionContext
    where
        Self: 'a;

    /// Open a new transactional context
    fn begin(&self) -> Result<Self::Tx<'_>, StoreError>;

    /// Isolation the contexts of this backend provide
    fn isolation_level(&self) -> IsolationLevel;
}

impl<C: Connection + ?Sized> Connection for &C {
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
        (**self).query_row(query)
    }

    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
        (**self).execute(statement)
    }
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
        (**self).query_row(query)
    }

    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
        (**self).execute(statement)
    }
}

/// Available backing stores
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// SQLite database file
    Sqlite,
    /// Process-local, discarded on exit
    Memory,
}

/// Configuration for opening a backing store
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Which backend to open
    pub kind: BackendKind,

    /// Database file (SQLite only)
    pub path: PathBuf,

    /// How long a SQLite connection waits on a locked database before
    /// reporting a conflict
    pub busy_timeout: Duration,

    /// Idle SQLite connections kept for reuse
    pub max_idle_connections: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Sqlite,
            path: PathBuf::from("ledger.db"),
            busy_timeout: Duration::from_millis(5000),
            max_idle_connections: 8,
        }
    }
}
