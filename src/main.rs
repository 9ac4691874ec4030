//! User Ledger CLI
//!
//! Command-line interface for managing users and spending their balances
//! atomically.
//!
//! # Usage
//!
//! ```bash
//! ledger create --name Alice --email alice@example.com --balance 100
//! ledger show 1
//! ledger spend 1 20
//! ledger import users.csv
//! ledger spend-batch --strategy async --max-concurrent 8 spends.csv > balances.csv
//! ledger --backend memory race --balance 100 --amount 20
//! ```
//!
//! Results are written to stdout as CSV. Logs go to stderr; `-v` enables
//! debug output and `RUST_LOG` overrides the filter.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (user not found, constraint violation, file not readable, etc.)

use rust_user_ledger::cli::{self, CommandError};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = cli::parse_args();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut output = std::io::stdout();
    match cli::run(&args, &mut output) {
        Ok(()) => {}
        Err(CommandError::NotFound(e)) => {
            eprintln!("Not found: {}", e);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
