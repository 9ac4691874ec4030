//! SQLite backing store
//!
//! Persists users in a single `users` table. The database runs in WAL journal
//! mode so readers never block the writer.
//!
//! # Connections
//!
//! Plain statements and transactional contexts each check a connection out of
//! a small idle pool and return it afterwards. Every connection carries the
//! configured busy timeout.
//!
//! # Transactions
//!
//! Contexts start with `BEGIN DEFERRED`; the read snapshot is taken by the
//! first query. A write from a context whose snapshot is older than the latest
//! commit fails with `SQLITE_BUSY_SNAPSHOT`, and a lock that stays busy past
//! the timeout fails with `SQLITE_BUSY`. Both surface as
//! [`StoreError::Conflict`], so of two overlapping read-modify-write scopes
//! only the first committer succeeds.

use super::{
    Backend, BackendConfig, Connection, ExecResult, IsolationLevel, Query, Statement,
    TransactionContext,
};
use crate::types::{StoreError, User};
use parking_lot::Mutex;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS users (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT    NOT NULL,
    email   TEXT    NOT NULL UNIQUE,
    balance INTEGER NOT NULL
)";

/// Persistent backing store in a SQLite database file
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
    max_idle: usize,
    idle: Mutex<Vec<rusqlite::Connection>>,
    next_txid: AtomicU64,
}

impl SqliteBackend {
    /// Open (or create) the database at `config.path`
    ///
    /// Switches the file to WAL journal mode and creates the `users` table if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(config: &BackendConfig) -> Result<Self, StoreError> {
        let backend = SqliteBackend {
            path: config.path.clone(),
            busy_timeout: config.busy_timeout,
            max_idle: config.max_idle_connections,
            idle: Mutex::new(Vec::new()),
            next_txid: AtomicU64::new(0),
        };

        let conn = backend.connect()?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| map_sqlite_error("open", e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(%mode, "SQLite did not switch to WAL journal mode");
        }
        conn.execute_batch(SCHEMA)
            .map_err(|e| map_sqlite_error("open", e))?;
        backend.release(conn);

        tracing::info!(path = %config.path.display(), "opened SQLite backend");
        Ok(backend)
    }

    /// Number of rows in the `users` table
    pub fn row_count(&self) -> Result<u64, StoreError> {
        let conn = self.checkout()?;
        let count: i64 = conn
            .get()?
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|e| map_sqlite_error("count", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn connect(&self) -> Result<rusqlite::Connection, StoreError> {
        let conn =
            rusqlite::Connection::open(&self.path).map_err(|e| map_sqlite_error("open", e))?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| map_sqlite_error("open", e))?;
        Ok(conn)
    }

    fn checkout(&self) -> Result<PooledConnection<'_>, StoreError> {
        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.connect()?,
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
        })
    }

    fn release(&self, conn: rusqlite::Connection) {
        if !conn.is_autocommit() {
            tracing::warn!("dropping SQLite connection with an open transaction");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

impl Connection for SqliteBackend {
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
        let conn = self.checkout()?;
        query_user(conn.get()?, query)
    }

    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
        let conn = self.checkout()?;
        execute_statement(conn.get()?, statement)
    }
}

impl Backend for SqliteBackend {
    type Tx<'a> = SqliteTransaction<'a>;

    fn begin(&self) -> Result<SqliteTransaction<'_>, StoreError> {
        let conn = self.checkout()?;
        conn.get()?
            .execute_batch("BEGIN DEFERRED")
            .map_err(|e| map_sqlite_error("begin", e))?;

        let txid = self.next_txid.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(txid, "SQLite transaction begun");
        Ok(SqliteTransaction {
            conn,
            txid,
            finished: false,
        })
    }

    fn isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }
}

/// A connection on loan from the idle pool
#[derive(Debug)]
struct PooledConnection<'a> {
    pool: &'a SqliteBackend,
    /// `None` once discarded
    conn: Option<rusqlite::Connection>,
}

impl PooledConnection<'_> {
    fn get(&self) -> Result<&rusqlite::Connection, StoreError> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::backend("connection", "connection was discarded"))
    }

    /// Close the connection instead of returning it to the pool
    fn discard(&mut self) {
        self.conn = None;
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Transactional context over a [`SqliteBackend`]
///
/// Holds its connection for the whole scope. Dropping it unfinished issues
/// `ROLLBACK`.
#[derive(Debug)]
pub struct SqliteTransaction<'a> {
    conn: PooledConnection<'a>,
    txid: u64,
    finished: bool,
}

impl Connection for SqliteTransaction<'_> {
    fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
        query_user(self.conn.get()?, query)
    }

    fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
        execute_statement(self.conn.get()?, statement)
    }
}

impl TransactionContext for SqliteTransaction<'_> {
    fn commit(mut self) -> Result<(), StoreError> {
        // On failure the scope stays open and Drop rolls it back.
        self.conn
            .get()?
            .execute_batch("COMMIT")
            .map_err(|e| map_sqlite_error("commit", e))?;
        self.finished = true;
        tracing::trace!(txid = self.txid, "SQLite transaction committed");
        Ok(())
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        let result = self
            .conn
            .get()?
            .execute_batch("ROLLBACK")
            .map_err(|e| map_sqlite_error("rollback", e));
        if result.is_err() {
            self.conn.discard();
        }
        tracing::trace!(txid = self.txid, "SQLite transaction rolled back");
        result
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let result = match self.conn.get() {
            Ok(conn) => conn.execute_batch("ROLLBACK"),
            Err(_) => return,
        };
        match result {
            Ok(()) => {
                tracing::debug!(txid = self.txid, "unfinished SQLite transaction rolled back")
            }
            Err(e) => {
                tracing::warn!(
                    txid = self.txid,
                    error = %e,
                    "rollback on drop failed, discarding connection"
                );
                self.conn.discard();
            }
        }
    }
}

fn operation_name(statement: &Statement) -> &'static str {
    match statement {
        Statement::InsertUser { .. } => "create",
        Statement::UpdateUser(_) => "update",
        Statement::DeleteUser(_) => "delete",
    }
}

fn query_user(conn: &rusqlite::Connection, query: &Query) -> Result<Option<User>, StoreError> {
    let Query::UserById(id) = *query;
    conn.query_row(
        "SELECT id, name, email, balance FROM users WHERE id = ?1",
        params![id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                balance: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| map_sqlite_error("find", e))
}

fn execute_statement(
    conn: &rusqlite::Connection,
    statement: &Statement,
) -> Result<ExecResult, StoreError> {
    let operation = operation_name(statement);
    let affected = match statement {
        Statement::InsertUser {
            name,
            email,
            balance,
        } => conn.execute(
            "INSERT INTO users (name, email, balance) VALUES (?1, ?2, ?3)",
            params![name, email, balance],
        ),
        Statement::UpdateUser(user) => conn.execute(
            "UPDATE users SET name = ?1, email = ?2, balance = ?3 WHERE id = ?4",
            params![user.name, user.email, user.balance, user.id],
        ),
        Statement::DeleteUser(id) => conn.execute("DELETE FROM users WHERE id = ?1", params![id]),
    }
    .map_err(|e| map_sqlite_error(operation, e))?;

    let last_insert_id = match statement {
        Statement::InsertUser { .. } => Some(conn.last_insert_rowid()),
        _ => None,
    };

    Ok(ExecResult {
        rows_affected: affected as u64,
        last_insert_id,
    })
}

/// Translate a SQLite failure into a [`StoreError`]
///
/// Constraint failures become `ConstraintViolation`, busy and locked
/// databases become `Conflict`, everything else is a `Backend` error.
pub fn map_sqlite_error(operation: &str, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    StoreError::constraint_violation(operation, message)
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    StoreError::conflict(operation, message)
                }
                _ => StoreError::backend(operation, message),
            }
        }
        _ => StoreError::backend(operation, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rusqlite::ffi;
    use tempfile::TempDir;

    fn open_temp(max_idle: usize) -> (TempDir, SqliteBackend) {
        let dir = TempDir::new().unwrap();
        let config = BackendConfig {
            path: dir.path().join("ledger.db"),
            busy_timeout: Duration::from_millis(200),
            max_idle_connections: max_idle,
            ..BackendConfig::default()
        };
        let backend = SqliteBackend::open(&config).unwrap();
        (dir, backend)
    }

    fn insert(conn: &impl Connection, email: &str, balance: i64) -> i64 {
        conn.execute(&Statement::InsertUser {
            name: "user".to_string(),
            email: email.to_string(),
            balance,
        })
        .unwrap()
        .last_insert_id
        .unwrap()
    }

    fn load(conn: &impl Connection, id: i64) -> Option<User> {
        conn.query_row(&Query::UserById(id)).unwrap()
    }

    #[rstest]
    #[case::unique(ffi::SQLITE_CONSTRAINT_UNIQUE, "constraint")]
    #[case::busy(ffi::SQLITE_BUSY, "conflict")]
    #[case::busy_snapshot(ffi::SQLITE_BUSY_SNAPSHOT, "conflict")]
    #[case::locked(ffi::SQLITE_LOCKED, "conflict")]
    #[case::io(ffi::SQLITE_IOERR, "backend")]
    fn test_map_sqlite_error(#[case] code: i32, #[case] expected: &str) {
        let err = rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some("boom".to_string()));
        let mapped = map_sqlite_error("update", err);

        let kind = match mapped {
            StoreError::ConstraintViolation { .. } => "constraint",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Backend { .. } => "backend",
            _ => "other",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn test_open_creates_schema_and_reopens() {
        let (dir, backend) = open_temp(2);
        let id = insert(&backend, "a@test.com", 10);
        drop(backend);

        let config = BackendConfig {
            path: dir.path().join("ledger.db"),
            ..BackendConfig::default()
        };
        let reopened = SqliteBackend::open(&config).unwrap();
        assert_eq!(load(&reopened, id).unwrap().balance, 10);
        assert_eq!(reopened.row_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_email_maps_to_constraint_violation() {
        let (_dir, backend) = open_temp(2);
        insert(&backend, "a@test.com", 0);

        let result = backend.execute(&Statement::InsertUser {
            name: "other".to_string(),
            email: "a@test.com".to_string(),
            balance: 0,
        });

        assert!(matches!(
            result,
            Err(StoreError::ConstraintViolation { .. })
        ));
        assert_eq!(backend.row_count().unwrap(), 1);
    }

    #[test]
    fn test_update_and_delete_of_missing_row_affect_nothing() {
        let (_dir, backend) = open_temp(2);

        let update = backend
            .execute(&Statement::UpdateUser(User {
                id: 99,
                name: "x".to_string(),
                email: "x@test.com".to_string(),
                balance: 0,
            }))
            .unwrap();
        let delete = backend.execute(&Statement::DeleteUser(99)).unwrap();

        assert_eq!(update.rows_affected, 0);
        assert_eq!(delete.rows_affected, 0);
    }

    #[test]
    fn test_uncommitted_writes_are_invisible_and_dropped() {
        let (_dir, backend) = open_temp(2);
        let id = insert(&backend, "a@test.com", 100);

        {
            let tx = backend.begin().unwrap();
            let mut user = load(&tx, id).unwrap();
            user.balance = 1;
            tx.execute(&Statement::UpdateUser(user)).unwrap();

            assert_eq!(load(&tx, id).unwrap().balance, 1);
            assert_eq!(load(&backend, id).unwrap().balance, 100);
        }

        assert_eq!(load(&backend, id).unwrap().balance, 100);
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let (_dir, backend) = open_temp(2);
        let id = insert(&backend, "a@test.com", 100);

        let tx = backend.begin().unwrap();
        let mut user = load(&tx, id).unwrap();
        user.balance = 75;
        tx.execute(&Statement::UpdateUser(user)).unwrap();
        tx.commit().unwrap();

        assert_eq!(load(&backend, id).unwrap().balance, 75);
    }

    #[test]
    fn test_stale_snapshot_write_conflicts() {
        let (_dir, backend) = open_temp(4);
        let id = insert(&backend, "a@test.com", 100);

        let first = backend.begin().unwrap();
        let second = backend.begin().unwrap();
        let mut first_user = load(&first, id).unwrap();
        let mut second_user = load(&second, id).unwrap();

        first_user.balance -= 20;
        first.execute(&Statement::UpdateUser(first_user)).unwrap();
        first.commit().unwrap();

        second_user.balance -= 20;
        let result = second.execute(&Statement::UpdateUser(second_user));

        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        drop(second);
        assert_eq!(load(&backend, id).unwrap().balance, 80);
    }

    #[test]
    fn test_pool_keeps_at_most_max_idle() {
        let (_dir, backend) = open_temp(1);

        let first = backend.begin().unwrap();
        let second = backend.begin().unwrap();
        first.rollback().unwrap();
        second.rollback().unwrap();

        assert_eq!(backend.idle.lock().len(), 1);
    }
}
