//! Synchronous processing strategy
//!
//! Applies spend requests one at a time, in file order, on the calling thread.
//!
//! # Design
//!
//! The SyncProcessingStrategy focuses on orchestration, delegating:
//! - CSV parsing to `SyncReader` (iterator interface)
//! - Each request to `spend` inside a `TransactionManager` scope
//! - CSV output to `csv_format::write_users_csv`
//!
//! Even single-threaded, other processes may be writing to the same database,
//! so conflicts are still retried.

use crate::backend::Backend;
use crate::core::{spend, TransactionManager};
use crate::io::csv_format::{write_users_csv, SpendCsvRecord};
use crate::io::sync_reader::SyncReader;
use crate::strategy::retry::{retry_on_conflict, RetryPolicy};
use crate::strategy::{touched_users, ProcessingStrategy};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

/// Synchronous processing strategy
///
/// # Examples
///
/// ```no_run
/// use rust_user_ledger::backend::MemoryBackend;
/// use rust_user_ledger::core::TransactionManager;
/// use rust_user_ledger::strategy::{ProcessingStrategy, RetryPolicy, SyncProcessingStrategy};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let manager = TransactionManager::new(Arc::new(MemoryBackend::new()));
/// let strategy = SyncProcessingStrategy::new(manager, RetryPolicy::default());
///
/// strategy
///     .process(Path::new("spends.csv"), &mut std::io::stdout())
///     .expect("Processing failed");
/// ```
#[derive(Debug)]
pub struct SyncProcessingStrategy<B> {
    manager: TransactionManager<B>,
    retry: RetryPolicy,
}

impl<B: Backend> SyncProcessingStrategy<B> {
    /// Create a strategy over `manager`
    pub fn new(manager: TransactionManager<B>, retry: RetryPolicy) -> Self {
        Self { manager, retry }
    }
}

impl<B: Backend> ProcessingStrategy for SyncProcessingStrategy<B> {
    /// Apply every spend request in the file, then write the touched users
    ///
    /// # Error Handling
    ///
    /// Fatal errors (file not found, output failure) are returned immediately.
    /// Malformed rows and failed spends are logged and processing continues.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        let reader = SyncReader::<SpendCsvRecord>::new(input_path)?;
        let mut touched = BTreeSet::new();

        for result in reader {
            match result {
                Ok(request) => {
                    let outcome = retry_on_conflict(&self.retry, || {
                        spend(&self.manager, request.user, request.amount)
                    });
                    match outcome {
                        Ok(()) => {
                            touched.insert(request.user);
                        }
                        Err(e) => tracing::warn!(user = request.user, "Spend failed: {}", e),
                    }
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }

        let users = touched_users(&self.manager.store(), &touched);
        write_users_csv(&users, output)?;

        Ok(())
    }
}
