#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::auth::GrantTarget;
    use crate::builder::{DumpQuery, SearchQuery};
    use crate::config::Config;
    use crate::error::SpineError;
    use crate::infrastructure::Store;
    use crate::lock::{LockMode, LockStatus};
    use crate::runtime::{Credentials, Spine};
    use crate::test_support::{account_builder, grant, key, person, seed, slots, Fixture, FlakyStore};
    use crate::transaction::TransactionState;
    use crate::types::{EntityKey, Value};

    fn account(id: i64) -> EntityKey {
        EntityKey::new("account", key(id))
    }

    fn flaky_spine(config: Config) -> (Arc<Spine>, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        seed(&store.inner);
        let spine = Spine::with_backend(config, store.clone());
        spine.register(account_builder()).unwrap();
        (Arc::new(spine), store)
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    #[test]
    fn get_reads_stored_slots_under_a_read_lock() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();

        assert_eq!(tx.get(&alice, "name").unwrap(), Value::from("alice"));
        assert_eq!(tx.get(&alice, "balance").unwrap(), Value::Int(100));
        assert_eq!(tx.get(&alice, "email").unwrap(), Value::Null);
        assert_eq!(tx.get(&alice, "id").unwrap(), Value::Int(1));
        assert_eq!(tx.held(), vec![(account(1), LockMode::Read)]);
        assert!(matches!(tx.get(&alice, "nickname"), Err(SpineError::InvalidArgument { .. })));
    }

    #[test]
    fn writes_are_visible_to_the_writer_only() {
        let fx = Fixture::new();
        let session = fx.admin();
        let tx = session.new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.set(&alice, "name", Value::from("alicia")).unwrap();
        assert_eq!(tx.get(&alice, "name").unwrap(), Value::from("alicia"));
        assert_eq!(tx.held(), vec![(account(1), LockMode::Write)]);

        let other = session.new_transaction().unwrap();
        let same = other.fetch("account", key(1)).unwrap();
        assert!(Arc::ptr_eq(&alice, &same));
        assert!(matches!(other.get(&same, "name"), Err(SpineError::Locked { .. })));
        assert_eq!(fx.stored(1)["name"], Value::from("alice"));
    }

    #[test]
    fn set_rejects_read_only_and_mistyped_values() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();

        assert!(matches!(
            tx.set(&alice, "created_by", Value::from("me")),
            Err(SpineError::ImmutableAttribute { .. })
        ));
        assert!(matches!(
            tx.set(&alice, "id", Value::Int(9)),
            Err(SpineError::ImmutableAttribute { .. })
        ));
        assert!(matches!(
            tx.set(&alice, "balance", Value::from("lots")),
            Err(SpineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            tx.set(&alice, "name", Value::Null),
            Err(SpineError::InvalidArgument { .. })
        ));
        tx.set(&alice, "email", Value::Null).unwrap();
    }

    // =========================================================================
    // Commit and rollback
    // =========================================================================

    #[test]
    fn commit_persists_and_releases() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.set(&alice, "balance", Value::Int(150)).unwrap();
        tx.commit().unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(fx.stored(1)["balance"], Value::Int(150));
        assert_eq!(fx.spine.locks().status(&alice), LockStatus::Unlocked);
        assert!(!alice.is_dirty());
        assert!(tx.held().is_empty());
    }

    #[test]
    fn closed_transactions_refuse_everything() {
        let fx = Fixture::new();
        let session = fx.admin();
        let tx = session.new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.commit().unwrap();

        let closed = |r: Result<(), SpineError>| matches!(r, Err(SpineError::TransactionClosed { .. }));
        assert!(closed(tx.commit()));
        assert!(closed(tx.rollback()));
        assert!(closed(tx.get(&alice, "name").map(|_| ())));
        assert!(closed(tx.set(&alice, "name", Value::from("x"))));
        assert!(closed(tx.fetch("account", key(2)).map(|_| ())));

        let tx = session.new_transaction().unwrap();
        tx.rollback().unwrap();
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(closed(tx.rollback()));
        assert!(closed(tx.commit()));
    }

    #[test]
    fn rollback_discards_writes() {
        let fx = Fixture::new();
        let session = fx.admin();
        let tx = session.new_transaction().unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();
        tx.set(&bob, "name", Value::from("robert")).unwrap();
        tx.rollback().unwrap();

        assert_eq!(fx.stored(2)["name"], Value::from("bob"));
        let tx = session.new_transaction().unwrap();
        assert_eq!(tx.get(&bob, "name").unwrap(), Value::from("bob"));
    }

    #[test]
    fn lock_is_free_again_after_commit() {
        let fx = Fixture::new();
        let session = fx.admin();
        let first = session.new_transaction().unwrap();
        let second = session.new_transaction().unwrap();
        let alice = first.fetch("account", key(1)).unwrap();

        first.set(&alice, "balance", Value::Int(1)).unwrap();
        assert!(matches!(
            second.set(&alice, "balance", Value::Int(2)),
            Err(SpineError::Locked { held: LockMode::Write, .. })
        ));
        first.commit().unwrap();

        second.set(&alice, "balance", Value::Int(2)).unwrap();
        second.commit().unwrap();
        assert_eq!(fx.stored(1)["balance"], Value::Int(2));
    }

    #[test]
    fn concurrent_writers_exactly_one_wins() {
        let fx = Fixture::new();
        let session = fx.admin();
        let barrier = Arc::new(Barrier::new(8));
        let outcomes: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let session = session.clone();
                    let barrier = barrier.clone();
                    scope.spawn(move || {
                        let tx = session.new_transaction().unwrap();
                        let alice = tx.fetch("account", key(1)).unwrap();
                        barrier.wait();
                        tx.set(&alice, "balance", Value::Int(i)).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    }

    #[test]
    fn commit_failure_keeps_locks_and_allows_retry() {
        let store = Arc::new(FlakyStore::default());
        seed(&store.inner);
        let spine = Spine::with_backend(Config::default(), store.clone());
        spine.register(account_builder()).unwrap();
        let session = spine
            .login(&crate::runtime::Credentials::new("admin", "admin-pw"))
            .unwrap();

        let tx = session.new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.set(&alice, "name", Value::from("alicia")).unwrap();

        store.set_failing(true);
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, SpineError::Commit { ref reason } if reason.contains("disk full")));
        assert!(err.is_retryable());
        assert!(tx.is_open());
        assert!(matches!(spine.locks().status(&alice), LockStatus::Write(_)));
        assert!(alice.is_dirty());

        store.set_failing(false);
        tx.commit().unwrap();
        let stored = store.load(alice.class().model(), &key(1)).unwrap();
        assert_eq!(stored["name"], Value::from("alicia"));
    }

    #[test]
    fn sweeper_cannot_reclaim_locks_of_a_committing_transaction() {
        let timeout = Duration::from_secs(60);
        let (spine, store) = flaky_spine(Config::default().lock_timeout(timeout));
        let reclaimed = Arc::new(AtomicUsize::new(usize::MAX));
        {
            let spine = Arc::downgrade(&spine);
            let reclaimed = reclaimed.clone();
            store.on_write(move || {
                if let Some(spine) = spine.upgrade() {
                    let later = Instant::now() + Duration::from_secs(3600);
                    reclaimed.store(spine.sweep_locks(later), Ordering::SeqCst);
                }
            });
        }
        let session = spine.login(&Credentials::new("admin", "admin-pw")).unwrap();
        let tx = session.new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.set(&alice, "name", Value::from("v1")).unwrap();
        tx.commit().unwrap();

        assert_eq!(reclaimed.load(Ordering::SeqCst), 0);
        assert!(tx.lost_locks().is_empty());
        let stored = store.load(alice.class().model(), &key(1)).unwrap();
        assert_eq!(stored["name"], Value::from("v1"));
        let check = session.new_transaction().unwrap();
        assert_eq!(check.get(&alice, "name").unwrap(), Value::from("v1"));
        check.commit().unwrap();
        assert_eq!(spine.locks().status(&alice), LockStatus::Unlocked);
    }

    #[test]
    fn failed_commit_unpins_its_locks() {
        let timeout = Duration::from_secs(60);
        let (spine, store) = flaky_spine(Config::default().lock_timeout(timeout));
        let session = spine.login(&Credentials::new("admin", "admin-pw")).unwrap();
        let tx = session.new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.set(&alice, "name", Value::from("v1")).unwrap();

        store.set_failing(true);
        assert!(matches!(tx.commit(), Err(SpineError::Commit { .. })));

        let later = Instant::now() + timeout + Duration::from_secs(1);
        assert_eq!(spine.sweep_locks(later), 1);
        assert!(matches!(tx.commit(), Err(SpineError::LostLock { .. })));
        tx.rollback().unwrap();
    }

    #[test]
    fn multi_entity_commit_is_all_or_nothing() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();
        tx.set(&alice, "balance", Value::Int(0)).unwrap();
        tx.set(&bob, "balance", Value::Int(150)).unwrap();

        // the row disappears behind the framework's back
        fx.store.delete(fx.accounts.model(), &key(2)).unwrap();
        assert!(matches!(tx.commit(), Err(SpineError::Commit { .. })));
        assert_eq!(fx.stored(1)["balance"], Value::Int(100));

        tx.rollback().unwrap();
        assert_eq!(fx.spine.locks().status(&alice), LockStatus::Unlocked);
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    #[test]
    fn writes_require_a_grant() {
        let fx = Fixture::new();
        let tx = fx.login("alice").new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();

        // reads are not guarded
        assert_eq!(tx.get(&alice, "name").unwrap(), Value::from("alice"));
        assert!(matches!(
            tx.set(&alice, "name", Value::from("al")),
            Err(SpineError::Authorization { ref operation, .. }) if operation == "account.set_name"
        ));

        fx.store.add_grant(grant(
            person("alice"),
            &["account.set_name"],
            GrantTarget::Entity(account(1)),
        ));
        tx.set(&alice, "name", Value::from("al")).unwrap();

        let bob = tx.fetch("account", key(2)).unwrap();
        assert!(matches!(
            tx.set(&bob, "name", Value::from("b")),
            Err(SpineError::Authorization { .. })
        ));
        assert!(matches!(tx.delete(&alice), Err(SpineError::Authorization { .. })));
        assert!(matches!(
            tx.create("account", slots([("name", "x".into()), ("balance", Value::Int(0))])),
            Err(SpineError::Authorization { .. })
        ));
    }

    // =========================================================================
    // Generated methods
    // =========================================================================

    #[test]
    fn invoke_dispatches_by_name() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();

        assert_eq!(tx.invoke(&bob, "get_id", &[]).unwrap(), Value::Int(2));
        assert_eq!(tx.invoke(&bob, "get_name", &[]).unwrap(), Value::from("bob"));
        assert_eq!(tx.invoke(&bob, "describe", &[]).unwrap(), Value::from("bob (2)"));
        assert_eq!(tx.invoke(&bob, "deposit", &[Value::Int(25)]).unwrap(), Value::Int(75));
        assert_eq!(tx.invoke(&bob, "set_name", &[Value::from("robert")]).unwrap(), Value::Null);
        assert_eq!(tx.held(), vec![(account(2), LockMode::Write)]);
        tx.commit().unwrap();

        assert_eq!(fx.stored(2)["balance"], Value::Int(75));
        assert_eq!(fx.stored(2)["name"], Value::from("robert"));
    }

    #[test]
    fn invoke_checks_arguments() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();

        assert!(matches!(tx.invoke(&bob, "deposit", &[]), Err(SpineError::InvalidArgument { .. })));
        assert!(matches!(
            tx.invoke(&bob, "deposit", &[Value::from("ten")]),
            Err(SpineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            tx.invoke(&bob, "set_created_by", &[Value::from("x")]),
            Err(SpineError::ImmutableAttribute { .. })
        ));
        assert!(matches!(tx.invoke(&bob, "withdraw", &[]), Err(SpineError::InvalidArgument { .. })));
        assert!(tx.held().is_empty());
    }

    #[test]
    fn read_only_operations_take_read_locks() {
        let fx = Fixture::new();
        let tx = fx.login("bob").new_transaction().unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();
        tx.invoke(&bob, "describe", &[]).unwrap();
        assert_eq!(tx.held(), vec![(account(2), LockMode::Read)]);
        assert!(matches!(
            tx.invoke(&bob, "deposit", &[Value::Int(1)]),
            Err(SpineError::Authorization { ref operation, .. }) if operation == "account.deposit"
        ));
    }

    // =========================================================================
    // Create and delete
    // =========================================================================

    #[test]
    fn create_allocates_a_key_and_write_locks() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let carol = tx
            .create("account", slots([("name", "carol".into()), ("balance", Value::Int(5))]))
            .unwrap();

        assert_eq!(carol.key(), &key(3));
        assert_eq!(tx.held(), vec![(account(3), LockMode::Write)]);
        assert_eq!(tx.get(&carol, "name").unwrap(), Value::from("carol"));
        assert!(fx.store.contains("account", &key(3)));
        tx.commit().unwrap();
        assert_eq!(fx.stored(3)["balance"], Value::Int(5));
    }

    #[test]
    fn rollback_undoes_create() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let carol = tx
            .create("account", slots([("name", "carol".into()), ("balance", Value::Int(5))]))
            .unwrap();
        tx.rollback().unwrap();

        assert!(!fx.store.contains("account", &key(3)));
        assert!(carol.is_deleted());
        assert!(fx.spine.cache().get(&account(3)).is_none());
    }

    #[test]
    fn create_validates_initial_values() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        assert!(matches!(
            tx.create("account", slots([("name", "x".into())])),
            Err(SpineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            tx.create("account", slots([("name", "x".into()), ("balance", "1".into())])),
            Err(SpineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            tx.create(
                "account",
                slots([("id", Value::Int(1)), ("name", "x".into()), ("balance", Value::Int(0))])
            ),
            Err(SpineError::AlreadyExists { .. })
        ));
        assert_eq!(fx.store.count("account"), 2);
    }

    #[test]
    fn committed_delete_invalidates_handles() {
        let fx = Fixture::new();
        let session = fx.admin();
        let tx = session.new_transaction().unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();
        tx.delete(&bob).unwrap();
        assert!(matches!(tx.get(&bob, "name"), Err(SpineError::ObjectDeleted { .. })));
        tx.commit().unwrap();

        assert!(bob.is_deleted());
        assert!(!fx.store.contains("account", &key(2)));

        let tx = session.new_transaction().unwrap();
        assert!(matches!(tx.get(&bob, "name"), Err(SpineError::ObjectDeleted { .. })));
        assert!(matches!(tx.fetch("account", key(2)), Err(SpineError::NotFound { .. })));
    }

    #[test]
    fn rolled_back_delete_restores_the_entity() {
        let fx = Fixture::new();
        let session = fx.admin();
        let tx = session.new_transaction().unwrap();
        let bob = tx.fetch("account", key(2)).unwrap();
        tx.delete(&bob).unwrap();
        tx.rollback().unwrap();

        let tx = session.new_transaction().unwrap();
        assert_eq!(tx.get(&bob, "name").unwrap(), Value::from("bob"));
        assert!(fx.store.contains("account", &key(2)));
    }

    #[test]
    fn pending_delete_is_invisible_to_other_transactions() {
        let fx = Fixture::new();
        let session = fx.admin();
        let deleter = session.new_transaction().unwrap();
        let bob = deleter.fetch("account", key(2)).unwrap();
        deleter.delete(&bob).unwrap();

        let other = session.new_transaction().unwrap();
        let same = other.fetch("account", key(2)).unwrap();
        assert!(Arc::ptr_eq(&bob, &same));
        assert_eq!(other.get(&same, "id").unwrap(), Value::Int(2));
        assert!(matches!(
            other.get(&same, "name"),
            Err(SpineError::Locked { held: LockMode::Write, .. })
        ));
        assert!(matches!(other.delete(&same), Err(SpineError::Locked { .. })));

        deleter.rollback().unwrap();
        assert_eq!(other.get(&same, "name").unwrap(), Value::from("bob"));
    }

    #[test]
    fn committed_delete_reaches_other_transactions() {
        let fx = Fixture::new();
        let session = fx.admin();
        let deleter = session.new_transaction().unwrap();
        let other = session.new_transaction().unwrap();
        let bob = deleter.fetch("account", key(2)).unwrap();
        deleter.delete(&bob).unwrap();
        assert!(other.fetch("account", key(2)).is_ok());

        deleter.commit().unwrap();
        assert!(matches!(other.get(&bob, "name"), Err(SpineError::ObjectDeleted { .. })));
        assert!(matches!(other.fetch("account", key(2)), Err(SpineError::NotFound { .. })));
    }

    #[test]
    fn uncommitted_create_is_locked_for_other_transactions() {
        let fx = Fixture::new();
        let session = fx.admin();
        let creator = session.new_transaction().unwrap();
        let carol = creator
            .create("account", slots([("name", "carol".into()), ("balance", Value::Int(5))]))
            .unwrap();

        let other = session.new_transaction().unwrap();
        let same = other.fetch("account", key(3)).unwrap();
        assert!(Arc::ptr_eq(&carol, &same));
        assert!(matches!(
            other.get(&same, "name"),
            Err(SpineError::Locked { held: LockMode::Write, .. })
        ));

        creator.rollback().unwrap();
        assert!(matches!(other.get(&same, "name"), Err(SpineError::ObjectDeleted { .. })));
        assert!(matches!(other.fetch("account", key(3)), Err(SpineError::NotFound { .. })));
    }

    #[test]
    fn rollback_removes_created_rows_before_unlocking() {
        let (spine, store) = flaky_spine(Config::default());
        let session = spine.login(&Credentials::new("admin", "admin-pw")).unwrap();
        let creator = session.new_transaction().unwrap();
        let carol = creator
            .create("account", slots([("name", "carol".into()), ("balance", Value::Int(5))]))
            .unwrap();

        let other = session.new_transaction().unwrap();
        let seen = Arc::new(Mutex::new(None));
        {
            let other = other.clone();
            let carol = carol.clone();
            let seen = seen.clone();
            store.on_write(move || {
                *seen.lock() = Some(other.set(&carol, "balance", Value::Int(9)));
            });
        }
        creator.rollback().unwrap();

        let seen = seen.lock().take().unwrap();
        assert!(matches!(seen, Err(SpineError::Locked { held: LockMode::Write, .. })));
        assert!(other.held().is_empty());
        assert!(carol.is_deleted());
    }

    #[test]
    fn create_over_a_locked_stale_handle_leaves_nothing_behind() {
        let fx = Fixture::new();
        let session = fx.admin();
        let early = session.new_transaction().unwrap();
        let ghost = early.reference("account", key(3)).unwrap();
        assert!(matches!(early.get(&ghost, "name"), Err(SpineError::NotFound { .. })));

        let creator = session.new_transaction().unwrap();
        let err = creator
            .create("account", slots([("name", "carol".into()), ("balance", Value::Int(5))]))
            .unwrap_err();
        assert!(matches!(err, SpineError::Locked { held: LockMode::Read, .. }));
        assert!(!fx.store.contains("account", &key(3)));
        assert!(creator.held().is_empty());

        creator.rollback().unwrap();
        assert!(!ghost.is_deleted());
        assert_eq!(fx.store.count("account"), 2);
    }

    // =========================================================================
    // Lookup, search, dump
    // =========================================================================

    #[test]
    fn fetch_validates_keys() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        assert!(matches!(tx.fetch("account", key(99)), Err(SpineError::NotFound { .. })));
        assert!(matches!(
            tx.fetch("account", crate::types::PrimaryKey::single("one")),
            Err(SpineError::InvalidArgument { .. })
        ));
        assert!(matches!(tx.fetch("group", key(1)), Err(SpineError::InvalidArgument { .. })));
    }

    #[test]
    fn reference_defers_loading() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let missing = tx.reference("account", key(42)).unwrap();
        assert!(!missing.is_loaded());
        assert!(matches!(tx.get(&missing, "name"), Err(SpineError::NotFound { .. })));

        let bob = tx.reference("account", key(2)).unwrap();
        assert_eq!(tx.get(&bob, "balance").unwrap(), Value::Int(50));
        assert!(bob.is_loaded());
    }

    #[test]
    fn search_and_dump() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();

        let mut query = SearchQuery::new(fx.accounts.clone());
        query.set_like("name", "AL*").unwrap();
        assert_eq!(tx.search(&query).unwrap(), vec![key(1)]);

        let mut query = SearchQuery::new(fx.accounts.clone());
        query.set_greater_than("balance", 10i64).unwrap();
        assert_eq!(tx.search(&query).unwrap(), vec![key(1), key(2)]);
        query.set_less_than("balance", 60i64).unwrap();
        assert_eq!(tx.search(&query).unwrap(), vec![key(2)]);

        let rows = tx
            .dump(&DumpQuery::new(fx.accounts.clone(), [key(2), key(1)]))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, key(2));
        assert_eq!(rows[0].values["name"], Value::from("bob"));
        assert_eq!(rows[1].values["balance"], Value::Int(100));
        assert!(!rows[0].values.contains_key("id"));
    }

    // =========================================================================
    // Lost locks and cancellation
    // =========================================================================

    #[test]
    fn swept_lock_fails_the_next_operation() {
        let timeout = Duration::from_secs(60);
        let fx = Fixture::with_config(Config::default().lock_timeout(timeout));
        let tx = fx.admin().new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.set(&alice, "name", Value::from("gone")).unwrap();

        let later = Instant::now() + timeout + Duration::from_secs(1);
        assert_eq!(fx.spine.sweep_locks(later), 1);
        assert!(!alice.is_dirty());
        assert_eq!(tx.lost_locks(), vec![account(1)]);

        assert!(matches!(tx.get(&alice, "name"), Err(SpineError::LostLock { .. })));
        assert!(matches!(tx.commit(), Err(SpineError::LostLock { .. })));
        tx.rollback().unwrap();
        assert_eq!(fx.stored(1)["name"], Value::from("alice"));
    }

    #[test]
    fn cancelled_transaction_fails_fast() {
        let fx = Fixture::new();
        let tx = fx.admin().new_transaction().unwrap();
        let alice = tx.fetch("account", key(1)).unwrap();
        tx.cancel_token().cancel();
        assert!(matches!(tx.get(&alice, "name"), Err(SpineError::Cancelled)));
        assert!(matches!(tx.commit(), Err(SpineError::Cancelled)));
        tx.rollback().unwrap();
    }
}
