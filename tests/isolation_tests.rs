//! Transactional isolation tests
//!
//! Every property runs against both backing stores: the in-memory adapter and
//! a SQLite database in a temporary directory. A small enum backend dispatches
//! to either one so the same `TransactionManager` code is exercised.
//!
//! Covered:
//! - Atomicity of a failing scope
//! - Lost-update prevention under real and forced interleavings
//! - The unscoped find/update path losing an update (regression)
//! - NotFound semantics of find, update, delete and spend
//! - Email uniqueness
//! - Rollback on panic
//! - Ids of rolled-back inserts

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rust_user_ledger::backend::{
        Backend, BackendConfig, Connection, ExecResult, IsolationLevel, MemoryBackend,
        MemoryTransaction, Query, SqliteBackend, SqliteTransaction, Statement, TransactionContext,
    };
    use rust_user_ledger::core::{
        debit, spend, EntityStore, InterleaveGate, Interleaved, InterleavedStore,
        TransactionManager,
    };
    use rust_user_ledger::strategy::{retry_on_conflict, RetryPolicy};
    use rust_user_ledger::{StoreError, User, UserId};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[derive(Clone, Copy, Debug)]
    enum Kind {
        Memory,
        Sqlite,
    }

    /// Either backing store, chosen per test case
    enum TestBackend {
        Memory(MemoryBackend),
        Sqlite(SqliteBackend, TempDir),
    }

    enum TestTx<'a> {
        Memory(MemoryTransaction<'a>),
        Sqlite(SqliteTransaction<'a>),
    }

    impl TestBackend {
        fn open(kind: Kind) -> Self {
            match kind {
                Kind::Memory => TestBackend::Memory(MemoryBackend::new()),
                Kind::Sqlite => {
                    let dir = TempDir::new().expect("Failed to create temp dir");
                    let config = BackendConfig {
                        path: dir.path().join("ledger.db"),
                        ..BackendConfig::default()
                    };
                    let backend = SqliteBackend::open(&config).expect("Failed to open SQLite");
                    TestBackend::Sqlite(backend, dir)
                }
            }
        }

        fn count(&self) -> u64 {
            match self {
                TestBackend::Memory(b) => b.len() as u64,
                TestBackend::Sqlite(b, _) => b.row_count().unwrap(),
            }
        }
    }

    impl Connection for TestBackend {
        fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
            match self {
                TestBackend::Memory(b) => b.query_row(query),
                TestBackend::Sqlite(b, _) => b.query_row(query),
            }
        }

        fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
            match self {
                TestBackend::Memory(b) => b.execute(statement),
                TestBackend::Sqlite(b, _) => b.execute(statement),
            }
        }
    }

    impl Connection for TestTx<'_> {
        fn query_row(&self, query: &Query) -> Result<Option<User>, StoreError> {
            match self {
                TestTx::Memory(tx) => tx.query_row(query),
                TestTx::Sqlite(tx) => tx.query_row(query),
            }
        }

        fn execute(&self, statement: &Statement) -> Result<ExecResult, StoreError> {
            match self {
                TestTx::Memory(tx) => tx.execute(statement),
                TestTx::Sqlite(tx) => tx.execute(statement),
            }
        }
    }

    impl TransactionContext for TestTx<'_> {
        fn commit(self) -> Result<(), StoreError> {
            match self {
                TestTx::Memory(tx) => tx.commit(),
                TestTx::Sqlite(tx) => tx.commit(),
            }
        }

        fn rollback(self) -> Result<(), StoreError> {
            match self {
                TestTx::Memory(tx) => tx.rollback(),
                TestTx::Sqlite(tx) => tx.rollback(),
            }
        }
    }

    impl Backend for TestBackend {
        type Tx<'a> = TestTx<'a>;

        fn begin(&self) -> Result<TestTx<'_>, StoreError> {
            match self {
                TestBackend::Memory(b) => b.begin().map(TestTx::Memory),
                TestBackend::Sqlite(b, _) => b.begin().map(TestTx::Sqlite),
            }
        }

        fn isolation_level(&self) -> IsolationLevel {
            match self {
                TestBackend::Memory(b) => b.isolation_level(),
                TestBackend::Sqlite(b, _) => b.isolation_level(),
            }
        }
    }

    fn manager(kind: Kind) -> TransactionManager<TestBackend> {
        TransactionManager::new(Arc::new(TestBackend::open(kind)))
    }

    fn seed(manager: &TransactionManager<TestBackend>, email: &str, balance: i64) -> UserId {
        let mut user = User::new("Seed", email, balance);
        manager.store().create(&mut user).unwrap();
        user.id
    }

    fn balance(manager: &TransactionManager<TestBackend>, id: UserId) -> i64 {
        manager.store().find(id).unwrap().balance
    }

    #[rstest]
    fn test_create_then_find_round_trips(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        let mut user = User::new("Alice", "alice@test.com", 100);

        manager.store().create(&mut user).unwrap();

        assert!(user.id > 0);
        assert_eq!(manager.store().find(user.id).unwrap(), user);
    }

    #[rstest]
    fn test_not_found_is_distinct(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        seed(&manager, "a@test.com", 1);

        assert_eq!(manager.store().find(999), Err(StoreError::not_found(999)));
        assert!(spend(&manager, 999, 1).unwrap_err().is_not_found());

        let mut ghost = User::new("Ghost", "ghost@test.com", 0);
        ghost.id = 999;
        assert_eq!(manager.store().update(&ghost), Err(StoreError::not_found(999)));
    }

    #[rstest]
    fn test_delete_then_find_is_not_found(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 1);

        manager.store().delete(id).unwrap();

        assert!(manager.store().find(id).unwrap_err().is_not_found());
        // Deleting again is a no-op
        manager.store().delete(id).unwrap();
    }

    #[rstest]
    fn test_duplicate_email_inserts_nothing(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        seed(&manager, "same@test.com", 1);

        let mut duplicate = User::new("Other", "same@test.com", 2);
        let result = manager.store().create(&mut duplicate);

        assert!(matches!(result, Err(StoreError::ConstraintViolation { .. })));
        assert_eq!(manager.backend().count(), 1);
    }

    #[rstest]
    fn test_failing_scope_leaves_no_trace(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 100);

        let result: Result<(), StoreError> = manager.run(|scope| {
            let mut user = scope.find(id)?;
            user.balance = 0;
            scope.update(&user)?;
            let mut extra = User::new("Extra", "extra@test.com", 5);
            scope.create(&mut extra)?;
            Err(StoreError::backend("work", "aborted"))
        });

        assert_eq!(result, Err(StoreError::backend("work", "aborted")));
        assert_eq!(balance(&manager, id), 100);
        assert_eq!(manager.backend().count(), 1);

        // A later scope sees the state from before the failed one
        let seen = manager.run(|scope| scope.find(id)).unwrap();
        assert_eq!(seen.balance, 100);

        // The email reserved inside the failed scope is free again
        let mut extra = User::new("Extra", "extra@test.com", 5);
        manager.store().create(&mut extra).unwrap();
    }

    #[rstest]
    #[case::memory(Kind::Memory, false)]
    #[case::sqlite(Kind::Sqlite, true)]
    fn test_rolled_back_insert_leaves_no_row(#[case] kind: Kind, #[case] id_reusable: bool) {
        let manager = manager(kind);
        seed(&manager, "a@test.com", 1);

        let mut discarded = 0;
        let result: Result<(), StoreError> = manager.run(|scope| {
            let mut user = User::new("Gone", "gone@test.com", 5);
            scope.create(&mut user)?;
            discarded = user.id;
            Err(StoreError::backend("work", "aborted"))
        });

        assert!(result.is_err());
        assert!(discarded > 0);
        assert!(manager.store().find(discarded).unwrap_err().is_not_found());

        let mut next = User::new("Next", "gone@test.com", 5);
        manager.store().create(&mut next).unwrap();
        // The memory counter never hands out a discarded id again; SQLite
        // rolls its sequence back together with the insert.
        assert!(next.id > discarded || (id_reusable && next.id == discarded));
    }

    #[rstest]
    fn test_uncommitted_writes_are_invisible(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 100);

        manager
            .run(|scope| {
                let mut user = scope.find(id)?;
                user.balance = 1;
                scope.update(&user)?;

                assert_eq!(scope.find(id)?.balance, 1);
                assert_eq!(manager.store().find(id)?.balance, 100);
                Ok(())
            })
            .unwrap();

        assert_eq!(balance(&manager, id), 1);
    }

    #[rstest]
    fn test_panic_inside_scope_rolls_back(#[values(Kind::Memory, Kind::Sqlite)] kind: Kind) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 100);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), StoreError> = manager.run(|scope| {
                let mut user = scope.find(id)?;
                user.balance = -500;
                scope.update(&user)?;
                panic!("work panicked mid-scope");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(balance(&manager, id), 100);
    }

    #[rstest]
    #[case::two_spenders(100, 2, 20, 60)]
    #[case::many_spenders(1000, 8, 10, 920)]
    fn test_concurrent_spends_lose_no_update(
        #[values(Kind::Memory, Kind::Sqlite)] kind: Kind,
        #[case] start: i64,
        #[case] spenders: usize,
        #[case] amount: i64,
        #[case] expected: i64,
    ) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", start);
        let barrier = Arc::new(Barrier::new(spenders));
        let policy = RetryPolicy::default();

        let handles: Vec<_> = (0..spenders)
            .map(|_| {
                let manager = manager.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    retry_on_conflict(&policy, || spend(&manager, id, amount))
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(balance(&manager, id), expected);
    }

    #[rstest]
    fn test_forced_interleaving_scoped_spend_is_serialized(
        #[values(Kind::Memory, Kind::Sqlite)] kind: Kind,
    ) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 100);
        let gate = InterleaveGate::new(2);
        let attempts = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::default();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let participant = Interleaved::new(manager.clone(), gate.clone());
                let attempts = Arc::clone(&attempts);
                thread::spawn(move || {
                    retry_on_conflict(&policy, || {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        spend(&participant, id, 20)
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(balance(&manager, id), 60);
        // Both read 100 before either wrote, so one of them had to retry
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[rstest]
    fn test_forced_interleaving_without_retry_reports_conflict(
        #[values(Kind::Memory, Kind::Sqlite)] kind: Kind,
    ) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 100);
        let gate = InterleaveGate::new(2);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let participant = Interleaved::new(manager.clone(), gate.clone());
                thread::spawn(move || {
                    retry_on_conflict(&RetryPolicy::no_retry(), || spend(&participant, id, 20))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].is_retryable());
        assert_eq!(balance(&manager, id), 80);
    }

    #[rstest]
    fn test_forced_interleaving_unscoped_path_loses_update(
        #[values(Kind::Memory, Kind::Sqlite)] kind: Kind,
    ) {
        let manager = manager(kind);
        let id = seed(&manager, "a@test.com", 100);
        let gate = InterleaveGate::new(2);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let manager = manager.clone();
                let gate = gate.clone();
                thread::spawn(move || {
                    let armed = AtomicBool::new(true);
                    let plain = manager.store();
                    let store = InterleavedStore::new(&plain, &gate, &armed);
                    debit(&store, id, 20).map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        // Both wrote 100 - 20: one decrement is lost
        assert_eq!(balance(&manager, id), 80);
    }
}
