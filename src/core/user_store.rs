//! Entity store over a connection-like handle
//!
//! `UserStore` maps the [`EntityStore`] operations onto single-row queries and
//! statements. It is generic over the handle, so the same code serves the
//! plain backend (autocommit) and a transactional context (scoped).

use crate::backend::{Connection, Query, Statement};
use crate::core::traits::EntityStore;
use crate::types::{StoreError, User, UserId};

/// Entity store bound to one connection-like handle
#[derive(Debug, Clone)]
pub struct UserStore<C> {
    conn: C,
}

/// Store bound to a borrowed transactional context
///
/// Every call joins the open scope of `T`.
pub type ScopedStore<'t, T> = UserStore<&'t T>;

impl<C: Connection> UserStore<C> {
    /// Bind a store to `conn`
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    /// The handle this store issues statements on
    pub fn connection(&self) -> &C {
        &self.conn
    }
}

impl<C: Connection> EntityStore for UserStore<C> {
    fn find(&self, id: UserId) -> Result<User, StoreError> {
        self.conn
            .query_row(&Query::UserById(id))?
            .ok_or_else(|| StoreError::not_found(id))
    }

    fn create(&self, user: &mut User) -> Result<(), StoreError> {
        let result = self.conn.execute(&Statement::InsertUser {
            name: user.name.clone(),
            email: user.email.clone(),
            balance: user.balance,
        })?;

        user.id = result
            .last_insert_id
            .ok_or_else(|| StoreError::backend("create", "no generated id returned"))?;
        tracing::trace!(user = user.id, "user created");
        Ok(())
    }

    fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = self.conn.execute(&Statement::UpdateUser(user.clone()))?;
        if result.rows_affected == 0 {
            return Err(StoreError::not_found(user.id));
        }
        tracing::trace!(user = user.id, balance = user.balance, "user updated");
        Ok(())
    }

    fn delete(&self, id: UserId) -> Result<(), StoreError> {
        let result = self.conn.execute(&Statement::DeleteUser(id))?;
        tracing::trace!(user = id, rows = result.rows_affected, "user deleted");
        Ok(())
    }
}
