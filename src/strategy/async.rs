//! Asynchronous batch processing strategy
//!
//! Reads spend requests in batches and applies each batch concurrently.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent, retry)
//!     ├── AsyncReader (batch CSV reading)
//!     └── BatchProcessor (bounded concurrent spends)
//!         └── TransactionManager<B>
//! ```
//!
//! # Concurrency
//!
//! - Batches are processed one after another
//! - Within a batch up to `max_concurrent` scopes run on blocking workers
//! - Requests for the same user may race; lost updates are prevented by the
//!   transaction manager and losers are retried per `RetryPolicy`

use crate::backend::Backend;
use crate::core::TransactionManager;
use crate::io::async_reader::AsyncReader;
use crate::io::csv_format::{write_users_csv, SpendCsvRecord};
use crate::strategy::batch_processor::BatchProcessor;
use crate::strategy::retry::RetryPolicy;
use crate::strategy::{touched_users, ProcessingStrategy};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

/// Configuration for batch processing
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Number of requests per batch
    pub batch_size: usize,
    /// Maximum number of scopes in flight within a batch
    pub max_concurrent: usize,
    /// Conflict retry policy for each request
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent: num_cpus::get(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig with custom values
    ///
    /// Zero values fall back to the defaults with a warning.
    pub fn new(batch_size: usize, max_concurrent: usize, retry: RetryPolicy) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            tracing::warn!(
                "Invalid batch_size ({}), using default ({})",
                batch_size,
                default.batch_size
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent = if max_concurrent == 0 {
            tracing::warn!(
                "Invalid max_concurrent ({}), using default ({})",
                max_concurrent,
                default.max_concurrent
            );
            default.max_concurrent
        } else {
            max_concurrent
        };

        Self {
            batch_size,
            max_concurrent,
            retry,
        }
    }
}

/// Asynchronous batch processing strategy
#[derive(Debug)]
pub struct AsyncProcessingStrategy<B> {
    manager: TransactionManager<B>,
    config: BatchConfig,
}

impl<B: Backend + 'static> AsyncProcessingStrategy<B> {
    /// Create a new AsyncProcessingStrategy
    ///
    /// # Arguments
    ///
    /// * `manager` - Transaction manager every spend runs through
    /// * `config` - Batch size, concurrency and retry policy
    pub fn new(manager: TransactionManager<B>, config: BatchConfig) -> Self {
        Self { manager, config }
    }
}

impl<B: Backend + 'static> ProcessingStrategy for AsyncProcessingStrategy<B> {
    /// Apply every spend request in the file, then write the touched users
    ///
    /// # Error Handling
    ///
    /// Fatal errors (file not found, runtime or output failure) are returned
    /// immediately. Malformed rows and failed spends are logged and
    /// processing continues.
    fn process(&self, input_path: &Path, output: &mut dyn Write) -> Result<(), String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent)
            .max_blocking_threads(self.config.max_concurrent)
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        let touched = runtime.block_on(async {
            let processor = BatchProcessor::new(
                self.manager.clone(),
                self.config.retry,
                self.config.max_concurrent,
            );

            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| format!("Failed to open file '{}': {}", input_path.display(), e))?;

            // Wrap tokio file in a compatibility layer for csv-async
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader: AsyncReader<_, SpendCsvRecord> = AsyncReader::new(compat_file);

            let mut touched = BTreeSet::new();
            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                tracing::debug!(requests = batch.len(), "processing batch");
                for outcome in processor.process_batch(batch).await {
                    match outcome.result {
                        Ok(()) => {
                            touched.insert(outcome.request.user);
                        }
                        Err(e) => {
                            tracing::warn!(user = outcome.request.user, "Spend failed: {}", e)
                        }
                    }
                }
            }

            Ok::<_, String>(touched)
        })?;

        let users = touched_users(&self.manager.store(), &touched);
        write_users_csv(&users, output)?;

        Ok(())
    }
}
