use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tessera_core::{TesseraError, TransactionError, TxConcurrency, TxIsolation, TxState, Value};
use tessera_storage::Cache;
use tessera_test_utils::assertions::{
    assert_conflict, assert_deadlock, assert_invalid_tx_state, assert_lock_timeout,
};
use tessera_test_utils::fixtures;

/// Run `f` on a fresh thread, which has no transaction bound.
fn elsewhere<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::spawn(f).join().unwrap()
}

fn read_elsewhere(cache: &Cache, key: i64) -> Option<Value> {
    let cache = cache.clone();
    elsewhere(move || cache.get(key).unwrap())
}

#[test]
fn commit_publishes_buffered_writes() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    for concurrency in [TxConcurrency::Pessimistic, TxConcurrency::Optimistic] {
        let mut tx = engine.tx_start(concurrency, TxIsolation::RepeatableRead).unwrap();
        cache.put(1, "x").unwrap();
        cache.put(3, "c").unwrap();
        assert_eq!(cache.get(1).unwrap(), Some(Value::from("x")));
        assert_eq!(read_elsewhere(&cache, 1), Some(Value::from("a")));
        assert_eq!(cache.size(), 2);

        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(read_elsewhere(&cache, 1), Some(Value::from("x")));
        assert_eq!(cache.size(), 3);

        cache.put(1, "a").unwrap();
        cache.remove(3).unwrap();
    }
}

#[test]
fn rollback_and_drop_discard_writes() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Pessimistic, TxIsolation::ReadCommitted)
        .unwrap();
    cache.put(1, "x").unwrap();
    assert!(cache.remove(2).unwrap());
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);

    {
        let _tx = engine
            .tx_start(TxConcurrency::Optimistic, TxIsolation::Serializable)
            .unwrap();
        cache.put(2, "y").unwrap();
    }

    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
    assert_eq!(cache.get(2).unwrap(), Some(Value::from("b")));
    assert!(engine.transactions().current_tx_id().is_none());
}

#[test]
fn nested_start_fails_on_same_thread() {
    let engine = fixtures::engine();
    let tx = engine.transactions().tx_start_default().unwrap();

    let err = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::ReadCommitted)
        .unwrap_err();
    assert_eq!(err, TransactionError::AlreadyActive { tx_id: tx.id() });
}

#[test]
fn optimistic_serializable_detects_conflict() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::Serializable)
        .unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
    let other = cache.clone();
    elsewhere(move || other.put(1, "z").unwrap());
    cache.put(1, "mine").unwrap();

    assert_conflict(&tx.commit());
    assert_eq!(tx.state(), TxState::RolledBack);
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("z")));
}

#[test]
fn optimistic_blind_writes_do_not_conflict_under_read_committed() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::ReadCommitted)
        .unwrap();
    cache.put(1, "mine").unwrap();
    let other = cache.clone();
    elsewhere(move || other.put(1, "z").unwrap());

    tx.commit().unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("mine")));
}

#[test]
fn repeatable_read_keeps_first_observation() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::RepeatableRead)
        .unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
    let other = cache.clone();
    elsewhere(move || other.put(1, "z").unwrap());
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
    drop(tx);

    let _rc = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::ReadCommitted)
        .unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("z")));
    let other = cache.clone();
    elsewhere(move || other.put(1, "w").unwrap());
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("w")));
}

#[test]
fn optimistic_repeatable_read_detects_conflict_on_commit() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::RepeatableRead)
        .unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
    cache.put(2, "from-a").unwrap();
    let other = cache.clone();
    elsewhere(move || other.put(1, "z").unwrap());

    assert_conflict(&tx.commit());
    assert_eq!(tx.state(), TxState::RolledBack);
    drop(tx);
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("z")));
    assert_eq!(cache.get(2).unwrap(), Some(Value::from("b")));
    assert_eq!(cache.size(), 2);
}

#[test]
fn optimistic_repeatable_read_only_transaction_conflicts() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::RepeatableRead)
        .unwrap();
    assert_eq!(cache.get(2).unwrap(), Some(Value::from("b")));
    let other = cache.clone();
    elsewhere(move || other.remove(2).unwrap());

    assert_conflict(&tx.commit());
    assert_eq!(tx.state(), TxState::RolledBack);
    drop(tx);
    assert_eq!(cache.get(2).unwrap(), None);
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
}

#[test]
fn optimistic_repeatable_read_commits_without_interference() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::RepeatableRead)
        .unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));
    cache.put(2, "from-a").unwrap();
    let other = cache.clone();
    elsewhere(move || other.put(3, "c").unwrap());

    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    assert_eq!(cache.get(2).unwrap(), Some(Value::from("from-a")));
}

#[test]
fn pessimistic_read_blocks_writers_until_commit() {
    let engine = fixtures::engine_with_timeout(Duration::from_millis(100));
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead)
        .unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("a")));

    let other = cache.clone();
    let blocked = elsewhere(move || other.put(1, "z"));
    assert_lock_timeout(&blocked);
    assert_eq!(read_elsewhere(&cache, 1), Some(Value::from("a")));

    tx.commit().unwrap();
    let other = cache.clone();
    elsewhere(move || other.put(1, "z")).unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("z")));
}

#[test]
fn lock_timeout_rolls_back_waiter() {
    let engine = fixtures::engine_with_timeout(Duration::from_millis(100));
    let cache = fixtures::letters_cache(&engine);

    let mut holder = engine
        .tx_start(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead)
        .unwrap();
    cache.put(1, "held").unwrap();

    let other = cache.clone();
    let engine_other = engine.clone();
    let (waited, state, after) = elsewhere(move || {
        let tx = engine_other
            .tx_start(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead)
            .unwrap();
        let waited = other.put(1, "waiter");
        let after = other.put(2, "again");
        (waited, tx.state(), after)
    });
    assert_lock_timeout(&waited);
    assert_eq!(state, TxState::RolledBack);
    assert_invalid_tx_state(&after);

    holder.commit().unwrap();
    assert_eq!(cache.get(1).unwrap(), Some(Value::from("held")));
    assert_eq!(cache.get(2).unwrap(), Some(Value::from("b")));
}

#[test]
fn deadlock_aborts_exactly_one_transaction() {
    let engine = fixtures::engine_with_timeout(Duration::from_secs(10));
    let cache = fixtures::letters_cache(&engine);
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |first: i64, second: i64| {
        let engine = engine.clone();
        let cache = cache.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || -> Result<(), TesseraError> {
            let mut tx = engine
                .tx_start(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead)
                .unwrap();
            cache.put(first, "first")?;
            barrier.wait();
            cache.put(second, "second")?;
            tx.commit()
        })
    };
    let left = spawn(1, 2);
    let right = spawn(2, 1);
    let outcomes = [left.join().unwrap(), right.join().unwrap()];

    let deadlocked: Vec<_> = outcomes.iter().filter(|r| r.is_err()).collect();
    assert_eq!(deadlocked.len(), 1);
    assert_deadlock(deadlocked[0]);
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);

    // The survivor wrote "second" over the key the victim had locked first.
    let values = [cache.get(1).unwrap(), cache.get(2).unwrap()];
    assert!(values.contains(&Some(Value::from("second"))));
    assert!(values.contains(&Some(Value::from("first"))));
}

#[test]
fn remove_all_in_transaction_clears_pending_puts() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead)
        .unwrap();
    cache.put(3, "c").unwrap();
    cache.remove_all().unwrap();
    assert_eq!(cache.get(3).unwrap(), None);
    tx.commit().unwrap();

    assert_eq!(cache.size(), 0);
}

#[test]
fn conditional_writes_inside_transactions() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::Serializable)
        .unwrap();
    assert!(!cache.put_if_absent(1, "x").unwrap());
    assert!(cache.put_if_absent(3, "c").unwrap());
    assert!(cache.replace(3, "c", "cc").unwrap());
    assert!(cache.remove(2).unwrap());
    assert!(cache.insert(3, "dup").is_err());
    tx.commit().unwrap();

    assert_eq!(cache.get(3).unwrap(), Some(Value::from("cc")));
    assert_eq!(cache.get(2).unwrap(), None);
}

#[test]
fn one_transaction_spans_caches() {
    let engine = fixtures::engine();
    let letters = fixtures::letters_cache(&engine);
    let orgs = fixtures::organization_cache(&engine);
    let org = tessera_core::BinaryObject::builder("Organization")
        .field("name", "ACME")
        .build();

    let result: Result<(), TesseraError> = engine.transactions().run_in_transaction(
        TxConcurrency::Pessimistic,
        TxIsolation::RepeatableRead,
        |_| {
            letters.put(3, "c")?;
            orgs.put(1, org.clone())?;
            Ok(())
        },
    );
    result.unwrap();
    assert_eq!(letters.size(), 3);
    assert_eq!(orgs.size(), 1);
}

#[test]
fn commit_fails_on_destroyed_cache() {
    let engine = fixtures::engine();
    let cache = fixtures::letters_cache(&engine);

    let mut tx = engine
        .tx_start(TxConcurrency::Optimistic, TxIsolation::ReadCommitted)
        .unwrap();
    cache.put(9, "z").unwrap();
    let other = engine.clone();
    elsewhere(move || other.destroy_cache("letters").unwrap());

    assert!(tx.commit().is_err());
    assert_eq!(tx.state(), TxState::RolledBack);
}
