//! Balance transfer operation
//!
//! `spend` decrements a user's balance as one read-modify-write scope. Running
//! the read and the write in the same scope is what keeps two concurrent
//! spends from both reading the old balance and overwriting each other.

use crate::core::traits::{EntityStore, Transact};
use crate::types::{Amount, StoreError, User, UserId};

/// Decrement `user_id`'s balance by `amount` atomically
///
/// # Arguments
///
/// * `manager` - Runs the read and the write in one scope
/// * `user_id` - User to charge
/// * `amount` - Amount to subtract; the balance may go negative
///
/// # Errors
///
/// - `StoreError::NotFound` if the user does not exist
/// - `StoreError::ArithmeticOverflow` if the new balance does not fit
/// - `StoreError::Conflict` (possibly wrapped in `Commit`) if a concurrent
///   scope on the same user committed first; nothing was changed and the
///   call may be retried
pub fn spend<M: Transact>(manager: &M, user_id: UserId, amount: Amount) -> Result<(), StoreError> {
    manager.transact(|scope| debit(scope, user_id, amount).map(|_| ()))
}

/// Find, subtract, update on whatever store it is given
///
/// Returns the user as written. Atomic only when `store` is scoped.
pub fn debit(store: &dyn EntityStore, user_id: UserId, amount: Amount) -> Result<User, StoreError> {
    let mut user = store.find(user_id)?;
    user.balance = user
        .balance
        .checked_sub(amount)
        .ok_or_else(|| StoreError::arithmetic_overflow("spend", user_id))?;
    store.update(&user)?;
    Ok(user)
}
