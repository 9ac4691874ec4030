//! Core traits for user storage and transactional scopes
//!
//! These abstractions let the balance operations run unchanged against a plain
//! store, a transaction-scoped store, or a decorated store used by the
//! interleaving harness.

use crate::types::{StoreError, User, UserId};

/// Single-row CRUD over users
///
/// Each call is one statement against whatever connection the implementor is
/// bound to. Atomicity across calls comes only from running them inside a
/// [`Transact`] scope.
pub trait EntityStore {
    /// Look up a user by id
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no user has this id.
    fn find(&self, id: UserId) -> Result<User, StoreError>;

    /// Insert a new user and write the generated id back into `user`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConstraintViolation` if the email is taken.
    fn create(&self, user: &mut User) -> Result<(), StoreError>;

    /// Overwrite name, email and balance of the row with `user.id`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no row has this id.
    fn update(&self, user: &User) -> Result<(), StoreError>;

    /// Remove the user with this id
    ///
    /// Deleting an id that does not exist succeeds.
    fn delete(&self, id: UserId) -> Result<(), StoreError>;
}

/// Something that can run a unit of work atomically
///
/// `work` receives a store whose effects all commit together when it returns
/// `Ok`, and are discarded when it returns `Err` or panics.
pub trait Transact {
    /// Run `work` inside one transactional scope
    fn transact<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn EntityStore) -> Result<T, StoreError>;
}
