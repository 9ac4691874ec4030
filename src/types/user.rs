//! User-related types for the ledger
//!
//! This module defines the User entity managed by the store and the
//! spend request records that drive batch processing.

/// User identifier
///
/// Assigned by the backing store on creation and immutable afterwards.
pub type UserId = i64;

/// Monetary amount in minor units (e.g. cents)
pub type Amount = i64;

/// A user row
///
/// In-process `User` values are snapshots owned by the caller. They hold no
/// reference back to storage; changes only reach the store through an explicit
/// `update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Store-generated identifier (0 until the user has been created)
    pub id: UserId,

    /// Display name, not unique
    pub name: String,

    /// Email address, unique across all users
    pub email: String,

    /// Current balance in minor units
    ///
    /// May go negative: spending does not check for sufficient funds.
    pub balance: Amount,
}

impl User {
    /// Create an unsaved user
    ///
    /// The id stays 0 until `EntityStore::create` writes the generated one back.
    pub fn new(name: impl Into<String>, email: impl Into<String>, balance: Amount) -> Self {
        User {
            id: 0,
            name: name.into(),
            email: email.into(),
            balance,
        }
    }
}

/// A single request to decrement a user's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendRequest {
    /// The user to charge
    pub user: UserId,

    /// Amount to subtract (non-negative)
    pub amount: Amount,
}
