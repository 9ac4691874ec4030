//! Subcommand execution
//!
//! Builds the configured backend, wraps it in a `TransactionManager` and runs
//! the requested command against it. Results go to the given writer as CSV;
//! diagnostics go through `tracing`.

use crate::backend::{Backend, BackendKind, MemoryBackend, SqliteBackend};
use crate::cli::args::{CliArgs, Command};
use crate::core::{
    debit, spend, EntityStore, InterleaveGate, Interleaved, InterleavedStore, TransactionManager,
};
use crate::io::csv_format::{write_users_csv, UserCsvRecord};
use crate::io::sync_reader::SyncReader;
use crate::strategy::{create_strategy, retry_on_conflict, RetryPolicy};
use crate::types::{Amount, StoreError, User, UserId};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Failure of a CLI command
#[derive(Debug, Error)]
pub enum CommandError {
    /// The requested user does not exist
    #[error("{0}")]
    NotFound(StoreError),

    /// Any other store failure
    #[error("{0}")]
    Store(StoreError),

    /// Reading input or writing output failed
    #[error("{0}")]
    Io(String),
}

impl From<StoreError> for CommandError {
    fn from(error: StoreError) -> Self {
        if error.is_not_found() {
            CommandError::NotFound(error)
        } else {
            CommandError::Store(error)
        }
    }
}

/// Final balances of one forced-interleaving run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceReport {
    /// Balance after two unscoped find/update spends
    pub unscoped: Amount,
    /// Balance after two transactional spends
    pub transactional: Amount,
    /// Balance a serial execution would produce
    pub expected: Amount,
}

/// Open the configured backend and run the command
pub fn run(args: &CliArgs, output: &mut dyn Write) -> Result<(), CommandError> {
    let config = args.backend_config();
    match config.kind {
        BackendKind::Sqlite => {
            let backend = SqliteBackend::open(&config)?;
            execute(TransactionManager::new(Arc::new(backend)), &args.command, output)
        }
        BackendKind::Memory => {
            tracing::debug!("using in-memory backend; nothing persists after exit");
            execute(
                TransactionManager::new(Arc::new(MemoryBackend::new())),
                &args.command,
                output,
            )
        }
    }
}

/// Run one command against `manager`
pub fn execute<B: Backend + 'static>(
    manager: TransactionManager<B>,
    command: &Command,
    output: &mut dyn Write,
) -> Result<(), CommandError> {
    match command {
        Command::Create {
            name,
            email,
            balance,
        } => {
            let mut user = User::new(name.as_str(), email.as_str(), *balance);
            manager.store().create(&mut user)?;
            tracing::info!(user = user.id, "created user");
            write_users_csv(&[user], output).map_err(CommandError::Io)
        }
        Command::Show { id } => {
            let user = manager.store().find(*id)?;
            write_users_csv(&[user], output).map_err(CommandError::Io)
        }
        Command::Delete { id } => {
            manager.store().delete(*id)?;
            tracing::info!(user = id, "deleted user");
            Ok(())
        }
        Command::Spend { id, amount } => {
            retry_on_conflict(&RetryPolicy::default(), || spend(&manager, *id, *amount))?;
            let user = manager.store().find(*id)?;
            write_users_csv(&[user], output).map_err(CommandError::Io)
        }
        Command::Import { file } => {
            let created = import_users(&manager, file)?;
            write_users_csv(&created, output).map_err(CommandError::Io)
        }
        Command::SpendBatch(batch) => {
            let strategy =
                create_strategy(batch.strategy.clone(), manager, batch.to_batch_config());
            strategy
                .process(&batch.file, output)
                .map_err(CommandError::Io)
        }
        Command::Race { balance, amount } => {
            let report = race(&manager, *balance, *amount, &RetryPolicy::default())?;
            writeln!(
                output,
                "path,balance\nunscoped,{}\ntransactional,{}\nexpected,{}",
                report.unscoped, report.transactional, report.expected
            )
            .map_err(|e| CommandError::Io(format!("Failed to write output: {}", e)))
        }
    }
}

/// Create every valid user in a CSV file
///
/// Rows that fail to parse or violate a constraint are logged and skipped.
///
/// # Returns
///
/// The created users with their generated ids.
pub fn import_users<B: Backend>(
    manager: &TransactionManager<B>,
    path: &Path,
) -> Result<Vec<User>, CommandError> {
    let reader = SyncReader::<UserCsvRecord>::new(path).map_err(CommandError::Io)?;
    let store = manager.store();
    let mut created = Vec::new();

    for result in reader {
        match result {
            Ok(mut user) => match store.create(&mut user) {
                Ok(()) => created.push(user),
                Err(StoreError::ConstraintViolation { message, .. }) => {
                    tracing::warn!(email = %user.email, "Skipping duplicate user: {}", message)
                }
                Err(e) => return Err(e.into()),
            },
            Err(e) => tracing::warn!("{}", e),
        }
    }

    tracing::info!(count = created.len(), "imported users");
    Ok(created)
}

/// Run two spends of `amount` on a fresh user under forced interleaving
///
/// Both participants finish their read before either writes. The unscoped
/// path reads and writes through the plain store and loses one decrement.
/// The transactional path runs `spend` through the manager; the scope that
/// loses the commit race is retried under `retry`. The seeded users are
/// deleted afterwards, also when a participant fails.
pub fn race<B: Backend>(
    manager: &TransactionManager<B>,
    balance: Amount,
    amount: Amount,
    retry: &RetryPolicy,
) -> Result<RaceReport, StoreError> {
    let expected = balance
        .checked_sub(amount)
        .and_then(|b| b.checked_sub(amount))
        .ok_or_else(|| StoreError::arithmetic_overflow("race", 0))?;

    let unscoped_id = seed_race_user(manager, "unscoped", balance)?;
    let scoped_id = match seed_race_user(manager, "transactional", balance) {
        Ok(id) => id,
        Err(e) => {
            manager.store().delete(unscoped_id)?;
            return Err(e);
        }
    };

    let gate = InterleaveGate::new(2);
    let unscoped_results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = gate.clone();
                s.spawn(move || {
                    let armed = AtomicBool::new(true);
                    let plain = manager.store();
                    let store = InterleavedStore::new(&plain, &gate, &armed);
                    debit(&store, unscoped_id, amount).map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(join_participant).collect()
    });

    let gate = InterleaveGate::new(2);
    let scoped_results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let participant = Interleaved::new(manager.clone(), gate.clone());
                s.spawn(move || retry_on_conflict(retry, || spend(&participant, scoped_id, amount)))
            })
            .collect();
        handles.into_iter().map(join_participant).collect()
    });

    let store = manager.store();
    let outcome = unscoped_results
        .into_iter()
        .chain(scoped_results)
        .collect::<Result<Vec<()>, StoreError>>()
        .and_then(|_| {
            Ok(RaceReport {
                unscoped: store.find(unscoped_id)?.balance,
                transactional: store.find(scoped_id)?.balance,
                expected,
            })
        });

    // The seeded rows go away whether or not a participant failed
    let cleanup = store.delete(unscoped_id).and(store.delete(scoped_id));
    let report = outcome?;
    cleanup?;

    tracing::info!(?report, "race finished");
    Ok(report)
}

fn join_participant(
    handle: ScopedJoinHandle<'_, Result<(), StoreError>>,
) -> Result<(), StoreError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(StoreError::backend("race", "participant panicked")))
}

fn seed_race_user<B: Backend>(
    manager: &TransactionManager<B>,
    label: &str,
    balance: Amount,
) -> Result<UserId, StoreError> {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut user = User::new(
        format!("race {}", label),
        format!("race-{}-{}-{}@ledger.invalid", label, std::process::id(), nonce),
        balance,
    );
    manager.store().create(&mut user)?;
    Ok(user.id)
}
