//! In-memory backing store
//!
//! Keeps users in a `DashMap` keyed by id, with a per-row version counter and
//! a second `DashMap` acting as the unique email index.
//!
//! # Transactions
//!
//! Transactions are optimistic. A [`MemoryTransaction`] records the version
//! of every row it reads (or that the row was absent) and buffers its writes.
//! `commit` takes the exclusive latch, checks that every recorded version is
//! still current, re-checks email uniqueness and applies all writes. The
//! first of two overlapping read-modify-write scopes to commit wins; the
//! other fails with [`StoreError::Conflict`] and leaves no trace.
//!
//! A write to a row whose recorded version is already stale fails at once
//! instead of waiting for commit.
//!
//! # Visibility
//!
//! Readers hold the shared latch while they look at the maps, so the writes of
//! a commit become visible all at once.

use super::{
    Backend, Connection, ExecResult, IsolationLevel, Query, Statement, TransactionContext,
};
use crate::types::{StoreError, User, UserId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A committed row and its version
#[derive(Debug, Clone)]
struct VersionedRow {
    user: User,
    /// Starts at 1 and increases on every committed write
    version: u64,
}

/// A write buffered inside a transaction
#[derive(Debug, Clone)]
enum PendingWrite {
    Put(User),
    Delete,
}

/// Process-local backing store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: DashMap<UserId, VersionedRow>,
    /// email -> id of the user holding it
    emails: DashMap<String, UserId>,
    next_id: AtomicI64,
    next_txid: AtomicU64,
    /// Shared for reads, exclusive for applying writes
    latch: RwLock<()>,
}

impl MemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed users
    pub fn len(&self) -> usize {
        let _guard = self.latch.read();
        self.rows.len()
    }

    /// Whether no user is committed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate_id(&self) -> UserId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Committed row, cloned out of the map
    fn committed(&self, id: UserId) -> Option<VersionedRow> {
        self.rows.get(&id).map(|row| row.value().clone())
    }

    fn committed_version(&self, id: UserId) -> Option<u64> {
        self.rows.get(&id).map(|row| row.version)
    }

    /// Insert or overwrite a row. Caller holds the exclusive latch.
    fn put_row(&self, user: User) {
        // The Ref into `rows` must be released before inserting into it.
        let previous = self
            .rows
            .get(&user.id)
            .map(|row| (row.version, row.user.email.clone()));

        let version = match previous {
            Some((version, old_email)) => {
                if old_email != user.email {
                    self.emails
                        .remove_if(&old_email, |_, holder| *holder == user.id);
                }
                version + 1
            }
            None => 1,
        };

        self.emails.insert(user.email.clone(), user.id);
        self.rows.insert(user.id, VersionedRow { user, version });
    }

    /// Remove a row. Caller holds the exclusive latch.
    fn remove_row(&self, id: UserId) -> bool {
        match self.rows.remove(&id) {
            Some((_, row)) => {
                self.emails.remove_if(&row.user.email, |_, holder| *holder == id);
                true
            }
            None => false,
        }
    }

    /// Whether `email` belongs to someone other than `owner`, taking the
    /// buffered writes of a transaction into account.
    fn email_taken(
        &self,
        writes: &BTreeMap<UserId, PendingWrite>,
        email: &str,
        owner: Option<UserId>,
    ) -> bool {
        let pending = writes.iter().any(|(id, write)| {
            Some(*id) != owner && matches!(write, PendingWrite::Put(user) if user.email == email)
        });
        if pending {
            return true;
        }

        match self.emails.get(email).map(|holder| *holder.value()) {
            Some(holder) if Some(holder) != owner => match writes.get(&holder) {
                Some(PendingWrite::Delete) => false,
                Some(PendingWrite::Put(user)) => user.email == email,
                None => true,
            },
            _ => false,
        }
    }
}

fn duplicate_email(operation: &str, email: &str) -> StoreError {
    StoreError::constraint_violation(
        operation,
        format!("UNIQUE constraint failed: users.email ({})", email),
    )
}

impl Connection for MemoryBackend {
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
        let Query::UserById(id) = *query;
        let _guard = self.latch.read();
        Ok(self.committed(id).map(|row| row.user))
    }

    /// Apply one statement directly
    ///
    /// Plain statements are blind writes: an update overwrites whatever is
    /// committed without checking what the caller read before.
    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
        let _guard = self.latch.write();
        let no_writes = BTreeMap::new();

        match statement {
            Statement::InsertUser {
                name,
                email,
                balance,
            } => {
                if self.email_taken(&no_writes, email, None) {
                    return Err(duplicate_email("create", email));
                }
                let id = self.allocate_id();
                self.put_row(User {
                    id,
                    name: name.clone(),
                    email: email.clone(),
                    balance: *balance,
                });
                Ok(ExecResult {
                    rows_affected: 1,
                    last_insert_id: Some(id),
                })
            }
            Statement::UpdateUser(user) => {
                if !self.rows.contains_key(&user.id) {
                    return Ok(ExecResult::default());
                }
                if self.email_taken(&no_writes, &user.email, Some(user.id)) {
                    return Err(duplicate_email("update", &user.email));
                }
                self.put_row(user.clone());
                Ok(ExecResult {
                    rows_affected: 1,
                    last_insert_id: None,
                })
            }
            Statement::DeleteUser(id) => Ok(ExecResult {
                rows_affected: u64::from(self.remove_row(*id)),
                last_insert_id: None,
            }),
        }
    }
}

impl Backend for MemoryBackend {
    type Tx<'a> = MemoryTransaction<'a>;

    fn begin(&self) -> Result<MemoryTransaction<'_>, StoreError> {
        let txid = self.next_txid.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(txid, "memory transaction begun");
        Ok(MemoryTransaction {
            backend: self,
            txid,
            state: RefCell::new(TxState::default()),
        })
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }
}

#[derive(Debug, Default)]
struct TxState {
    /// Version observed on first read; `None` when the row was absent
    reads: HashMap<UserId, Option<u64>>,
    /// Ordered so commits apply in a deterministic order
    writes: BTreeMap<UserId, PendingWrite>,
}

/// Transactional context over a [`MemoryBackend`]
///
/// Nothing reaches the backend before `commit`; dropping the context discards
/// the buffered writes.
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    backend: &'a MemoryBackend,
    txid: u64,
    state: RefCell<TxState>,
}

impl MemoryTransaction<'_> {
    /// Row as this transaction sees it, recording the read
    fn visible(&self, state: &mut TxState, id: UserId) -> Option<User> {
        if let Some(write) = state.writes.get(&id) {
            return match write {
                PendingWrite::Put(user) => Some(user.clone()),
                PendingWrite::Delete => None,
            };
        }

        let row = {
            let _guard = self.backend.latch.read();
            self.backend.committed(id)
        };
        state
            .reads
            .entry(id)
            .or_insert(row.as_ref().map(|row| row.version));
        row.map(|row| row.user)
    }

    /// Fail fast when a row this transaction read has since been committed over
    fn ensure_current(
        &self,
        state: &TxState,
        id: UserId,
        operation: &str,
    ) -> Result<(), StoreError> {
        if let Some(seen) = state.reads.get(&id) {
            let current = {
                let _guard = self.backend.latch.read();
                self.backend.committed_version(id)
            };
            if current != *seen {
                return Err(StoreError::conflict(
                    operation,
                    format!("user {} was modified by a concurrent transaction", id),
                ));
            }
        }
        Ok(())
    }

    fn ensure_email_free(
        &self,
        state: &TxState,
        email: &str,
        owner: Option<UserId>,
        operation: &str,
    ) -> Result<(), StoreError> {
        let taken = {
            let _guard = self.backend.latch.read();
            self.backend.email_taken(&state.writes, email, owner)
        };
        if taken {
            return Err(duplicate_email(operation, email));
        }
        Ok(())
    }
}

impl Connection for MemoryTransaction<'_> {
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
        let Query::UserById(id) = *query;
        let mut state = self.state.borrow_mut();
        Ok(self.visible(&mut state, id))
    }

    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
        let mut state = self.state.borrow_mut();

        match statement {
            Statement::InsertUser {
                name,
                email,
                balance,
            } => {
                self.ensure_email_free(&state, email, None, "create")?;
                let id = self.backend.allocate_id();
                state.writes.insert(
                    id,
                    PendingWrite::Put(User {
                        id,
                        name: name.clone(),
                        email: email.clone(),
                        balance: *balance,
                    }),
                );
                Ok(ExecResult {
                    rows_affected: 1,
                    last_insert_id: Some(id),
                })
            }
            Statement::UpdateUser(user) => {
                if self.visible(&mut state, user.id).is_none() {
                    return Ok(ExecResult::default());
                }
                self.ensure_current(&state, user.id, "update")?;
                self.ensure_email_free(&state, &user.email, Some(user.id), "update")?;
                state
                    .writes
                    .insert(user.id, PendingWrite::Put(user.clone()));
                Ok(ExecResult {
                    rows_affected: 1,
                    last_insert_id: None,
                })
            }
            Statement::DeleteUser(id) => {
                if self.visible(&mut state, *id).is_none() {
                    return Ok(ExecResult::default());
                }
                self.ensure_current(&state, *id, "delete")?;
                state.writes.insert(*id, PendingWrite::Delete);
                Ok(ExecResult {
                    rows_affected: 1,
                    last_insert_id: None,
                })
            }
        }
    }
}

impl TransactionContext for MemoryTransaction<'_> {
    fn commit(self) -> Result<(), StoreError> {
        let txid = self.txid;
        let backend = self.backend;
        let state = self.state.into_inner();

        let _guard = backend.latch.write();

        // First committer wins: every row we read must be unchanged.
        for (id, seen) in &state.reads {
            if backend.committed_version(*id) != *seen {
                tracing::debug!(txid, user = id, "commit rejected: stale read");
                return Err(StoreError::conflict(
                    "commit",
                    format!("user {} was modified by a concurrent transaction", id),
                ));
            }
        }

        for (id, write) in &state.writes {
            if let PendingWrite::Put(user) = write {
                if backend.email_taken(&state.writes, &user.email, Some(*id)) {
                    return Err(duplicate_email("commit", &user.email));
                }
            }
        }

        let applied = state.writes.len();
        for (id, write) in state.writes {
            match write {
                PendingWrite::Put(user) => backend.put_row(user),
                PendingWrite::Delete => {
                    backend.remove_row(id);
                }
            }
        }

        tracing::trace!(txid, applied, "memory transaction committed");
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        tracing::trace!(txid = self.txid, "memory transaction rolled back");
        Ok(())
    }
}
