//! Processing strategy module for spend batches
//!
//! This module defines the Strategy pattern for applying a file of spend
//! requests against the store. Different implementations (sequential,
//! concurrent batch) can be selected at runtime; all of them run each request
//! through `spend` and retry scopes that lose a commit race.

use crate::backend::Backend;
use crate::cli::StrategyType;
use crate::core::{EntityStore, TransactionManager};
use crate::types::{User, UserId};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

pub mod r#async;
pub mod batch_processor;
pub mod retry;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use batch_processor::{BatchProcessor, SpendOutcome};
pub use retry::{retry_on_conflict, RetryPolicy};
pub use sync::SyncProcessingStrategy;

/// Processing strategy trait for spend batches
pub trait ProcessingStrategy: Send + Sync {
    /// Apply spend requests from `input_path` and write the touched users
    ///
    /// # Arguments
    ///
    /// * `input_path` - CSV file with `user,amount` rows
    /// * `output` - Writer for the final state of every successfully charged user
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the file was processed (individual failures are logged)
    /// * `Err(String)` if a fatal error occurred (file not found, I/O error)
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String>;
}

/// Create a processing strategy based on the specified strategy type
///
/// # Arguments
///
/// * `strategy_type` - Sequential or concurrent processing
/// * `manager` - Transaction manager the strategy runs spends through
/// * `config` - Batch configuration; only the retry policy applies to sync
pub fn create_strategy<B: Backend + 'static>(
    strategy_type: StrategyType,
    manager: TransactionManager<B>,
    config: BatchConfig,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy::new(manager, config.retry)),
        StrategyType::Async => Box::new(AsyncProcessingStrategy::new(manager, config)),
    }
}

/// Current state of each id in `ids`, skipping users deleted since
fn touched_users(store: &dyn EntityStore, ids: &BTreeSet<UserId>) -> Vec<User> {
    ids.iter()
        .filter_map(|&id| match store.find(id) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(user = id, "Could not load final state: {}", e);
                None
            }
        })
        .collect()
}
