//! CSV format handling for user and spend records
//!
//! This module centralizes all CSV format concerns, providing:
//! - Row structures for deserialization (`SpendCsvRecord`, `UserCsvRecord`)
//! - The `CsvRow` conversion from a raw row to its domain value
//! - User output serialization
//!
//! All functions are pure (no I/O) for easy testing.

use crate::types::{Amount, SpendRequest, User, UserId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Write;

/// A deserializable CSV row that converts into a domain value
///
/// Conversion errors are plain messages; readers prefix them with the line
/// number.
pub trait CsvRow: DeserializeOwned {
    /// Domain value produced by this row
    type Output;

    /// Validate the row and convert it
    fn convert(self) -> Result<Self::Output, String>;
}

/// Spend request row with columns: user, amount
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SpendCsvRecord {
    pub user: UserId,
    pub amount: Amount,
}

impl CsvRow for SpendCsvRecord {
    type Output = SpendRequest;

    fn convert(self) -> Result<SpendRequest, String> {
        if self.amount < 0 {
            return Err(format!(
                "Negative amount {} for user {}",
                self.amount, self.user
            ));
        }

        Ok(SpendRequest {
            user: self.user,
            amount: self.amount,
        })
    }
}

/// User import row with columns: name, email, balance
///
/// The balance column is optional and defaults to 0.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UserCsvRecord {
    pub name: String,
    pub email: String,
    pub balance: Option<Amount>,
}

impl CsvRow for UserCsvRecord {
    type Output = User;

    fn convert(self) -> Result<User, String> {
        if self.name.trim().is_empty() {
            return Err(format!("Missing name for '{}'", self.email));
        }
        if !self.email.contains('@') {
            return Err(format!("Invalid email '{}' for '{}'", self.email, self.name));
        }

        Ok(User::new(
            self.name.trim(),
            self.email.trim(),
            self.balance.unwrap_or(0),
        ))
    }
}

/// Write users to CSV format
///
/// Writes users with columns: id, name, email, balance.
/// Users are sorted by id for deterministic output.
///
/// # Arguments
///
/// * `users` - Slice of users to write
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_users_csv(users: &[User], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["id", "name", "email", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted_users = users.to_vec();
    sorted_users.sort_by_key(|user| user.id);

    for user in sorted_users {
        writer
            .write_record(&[
                user.id.to_string(),
                user.name,
                user.email,
                user.balance.to_string(),
            ])
            .map_err(|e| format!("Failed to write user record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
