use crate::backend::{BackendConfig, BackendKind};
use crate::strategy::{BatchConfig, RetryPolicy};
use crate::types::{Amount, UserId};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Manage users and balances with atomic spends
#[derive(Parser, Debug)]
#[command(name = "ledger")]
#[command(about = "Manage users and balances with atomic spends", long_about = None)]
pub struct CliArgs {
    /// Backing store to use
    #[arg(
        long = "backend",
        value_name = "BACKEND",
        default_value = "sqlite",
        global = true,
        help = "Backing store: 'sqlite' for a database file or 'memory' for a throwaway store"
    )]
    pub backend: BackendType,

    /// SQLite database file
    #[arg(
        long = "db",
        value_name = "PATH",
        default_value = "ledger.db",
        global = true,
        help = "Path to the SQLite database file (created if missing)"
    )]
    pub db: PathBuf,

    /// Busy timeout for SQLite connections
    #[arg(
        long = "busy-timeout-ms",
        value_name = "MS",
        default_value_t = 5000,
        global = true,
        help = "How long to wait on a locked database before reporting a conflict"
    )]
    pub busy_timeout_ms: u64,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a user and print it
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        balance: Amount,
    },
    /// Print a user
    Show { id: UserId },
    /// Delete a user (succeeds if it does not exist)
    Delete { id: UserId },
    /// Subtract an amount from a user's balance atomically
    Spend {
        id: UserId,
        #[arg(value_parser = clap::value_parser!(i64).range(0..))]
        amount: Amount,
    },
    /// Create users from a CSV file with columns name,email,balance
    Import { file: PathBuf },
    /// Apply spend requests from a CSV file with columns user,amount
    SpendBatch(SpendBatchArgs),
    /// Run two spends with forced interleaving, with and without a transaction
    Race {
        #[arg(long, default_value_t = 100, allow_hyphen_values = true)]
        balance: Amount,
        #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(i64).range(0..))]
        amount: Amount,
    },
}

/// Arguments of `spend-batch`
#[derive(Args, Debug)]
pub struct SpendBatchArgs {
    /// Input CSV file path containing spend requests
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub file: PathBuf,

    /// Processing strategy
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "sync",
        help = "Processing strategy: 'sync' for sequential or 'async' for concurrent batches"
    )]
    pub strategy: StrategyType,

    /// Number of requests per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of requests per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of scopes in flight (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of spends in flight (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    /// Attempts per request when scopes conflict
    #[arg(
        long = "max-attempts",
        value_name = "COUNT",
        help = "Attempts per request before giving up on conflicts (default: 32)"
    )]
    pub max_attempts: Option<u32>,
}

/// Available processing strategies for spend batches
#[derive(Clone, Debug, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

/// Available backing stores
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendType {
    Sqlite,
    Memory,
}

impl CliArgs {
    /// Create a BackendConfig from CLI arguments
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            kind: match self.backend {
                BackendType::Sqlite => BackendKind::Sqlite,
                BackendType::Memory => BackendKind::Memory,
            },
            path: self.db.clone(),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            ..BackendConfig::default()
        }
    }
}

impl SpendBatchArgs {
    /// Create a BatchConfig from CLI arguments
    ///
    /// Missing values use the defaults; zero values fall back to the defaults
    /// with a warning.
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_none()
            && self.max_concurrent.is_none()
            && self.max_attempts.is_none()
        {
            return BatchConfig::default();
        }

        let default = BatchConfig::default();
        let retry = match self.max_attempts {
            Some(attempts) => RetryPolicy::new(attempts, default.retry.backoff),
            None => default.retry,
        };
        BatchConfig::new(
            self.batch_size.unwrap_or(default.batch_size),
            self.max_concurrent.unwrap_or(default.max_concurrent),
            retry,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn batch_args(args: &[&str]) -> SpendBatchArgs {
        match CliArgs::try_parse_from(args).unwrap().command {
            Command::SpendBatch(batch) => batch,
            other => panic!("Expected spend-batch, got {:?}", other),
        }
    }

    #[rstest]
    #[case::defaults(&["ledger", "show", "1"], BackendKind::Sqlite, "ledger.db", 5000)]
    #[case::memory(
        &["ledger", "--backend", "memory", "show", "1"],
        BackendKind::Memory,
        "ledger.db",
        5000
    )]
    #[case::global_after_subcommand(
        &["ledger", "show", "1", "--db", "other.db", "--busy-timeout-ms", "50"],
        BackendKind::Sqlite,
        "other.db",
        50
    )]
    fn test_backend_config(
        #[case] args: &[&str],
        #[case] kind: BackendKind,
        #[case] path: &str,
        #[case] timeout_ms: u64,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().backend_config();

        assert_eq!(config.kind, kind);
        assert_eq!(config.path, PathBuf::from(path));
        assert_eq!(config.busy_timeout, Duration::from_millis(timeout_ms));
    }

    #[rstest]
    #[case::default_strategy(&["ledger", "spend-batch", "in.csv"], StrategyType::Sync)]
    #[case::explicit_async(
        &["ledger", "spend-batch", "--strategy", "async", "in.csv"],
        StrategyType::Async
    )]
    fn test_strategy_parsing(#[case] args: &[&str], #[case] expected: StrategyType) {
        let parsed = batch_args(args);
        match (&parsed.strategy, &expected) {
            (StrategyType::Sync, StrategyType::Sync) => (),
            (StrategyType::Async, StrategyType::Async) => (),
            _ => panic!("Expected {:?}, got {:?}", expected, parsed.strategy),
        }
    }

    #[rstest]
    #[case::all_defaults(&["ledger", "spend-batch", "in.csv"], 1000, num_cpus::get(), 32)]
    #[case::custom_batch_size(
        &["ledger", "spend-batch", "--batch-size", "50", "in.csv"],
        50,
        num_cpus::get(),
        32
    )]
    #[case::all_custom(
        &[
            "ledger", "spend-batch", "--batch-size", "50", "--max-concurrent", "3",
            "--max-attempts", "5", "in.csv",
        ],
        50,
        3,
        5
    )]
    #[case::zero_values_fall_back(
        &[
            "ledger", "spend-batch", "--batch-size", "0", "--max-concurrent", "0",
            "--max-attempts", "0", "in.csv",
        ],
        1000,
        num_cpus::get(),
        32
    )]
    fn test_batch_config_conversion(
        #[case] args: &[&str],
        #[case] batch_size: usize,
        #[case] max_concurrent: usize,
        #[case] max_attempts: u32,
    ) {
        let config = batch_args(args).to_batch_config();

        assert_eq!(config.batch_size, batch_size);
        assert_eq!(config.max_concurrent, max_concurrent);
        assert_eq!(config.retry.max_attempts, max_attempts);
    }

    #[test]
    fn test_create_accepts_negative_balance() {
        let parsed = CliArgs::try_parse_from([
            "ledger", "create", "--name", "A", "--email", "a@test.com", "--balance", "-5",
        ])
        .unwrap();

        match parsed.command {
            Command::Create { balance, .. } => assert_eq!(balance, -5),
            other => panic!("Expected create, got {:?}", other),
        }
    }

    #[rstest]
    #[case::missing_subcommand(&["ledger"])]
    #[case::negative_spend(&["ledger", "spend", "1", "-5"])]
    #[case::invalid_backend(&["ledger", "--backend", "postgres", "show", "1"])]
    #[case::invalid_strategy(&["ledger", "spend-batch", "--strategy", "invalid", "in.csv"])]
    #[case::missing_email(&["ledger", "create", "--name", "A"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
