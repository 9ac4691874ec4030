//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `user`: the User entity and spend requests
//! - `error`: Error types for the store and transaction layer

pub mod error;
pub mod user;

pub use error::StoreError;
pub use user::{Amount, SpendRequest, User, UserId};
