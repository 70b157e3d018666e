//! Lock, steal and unlock across two connections.

mod common;

use common::{assert_quiet, next_event, FakeOvsdb, LockEvent, LockRecorder, DB};
use ovsdb_client::Operation;

const LOCK: &str = "ovs_config";

#[tokio::test]
async fn test_free_lock_is_granted_immediately() {
    let server = FakeOvsdb::new();
    let client = server.connect();
    let (callback, mut events) = LockRecorder::new();

    assert!(client.lock(LOCK, callback).await.unwrap());
    // ownership is recorded before the callback runs
    assert!(client.is_lock_held(LOCK));
    assert!(!client.is_lock_held("other"));
    assert_eq!(next_event(&mut events).await, LockEvent::Locked(LOCK.into()));
    assert!(client.is_lock_held(LOCK));
}

#[tokio::test]
async fn test_disconnect_releases_held_locks() {
    let server = FakeOvsdb::new();
    let client = server.connect();
    let (callback, mut events) = LockRecorder::new();
    assert!(client.lock(LOCK, callback).await.unwrap());
    next_event(&mut events).await;

    server.disconnect_all();
    client.closed().await;
    assert!(!client.is_lock_held(LOCK));

    // another connection can take it without stealing
    let other = server.connect();
    let (other_cb, _other_events) = LockRecorder::new();
    assert!(other.lock(LOCK, other_cb).await.unwrap());
    assert!(other.is_lock_held(LOCK));
}

#[tokio::test]
async fn test_queued_lock_granted_after_unlock() {
    let server = FakeOvsdb::new();
    let owner = server.connect();
    let waiter = server.connect();
    let (owner_cb, mut owner_events) = LockRecorder::new();
    let (waiter_cb, mut waiter_events) = LockRecorder::new();

    assert!(owner.lock(LOCK, owner_cb).await.unwrap());
    next_event(&mut owner_events).await;

    assert!(!waiter.lock(LOCK, waiter_cb).await.unwrap());
    assert!(!waiter.is_lock_held(LOCK));
    assert_quiet(&mut waiter_events).await;

    owner.unlock(LOCK).await.unwrap();
    assert!(!owner.is_lock_held(LOCK));
    assert_eq!(next_event(&mut waiter_events).await, LockEvent::Locked(LOCK.into()));
    assert!(waiter.is_lock_held(LOCK));
}

#[tokio::test]
async fn test_owner_disconnect_passes_lock_on() {
    let server = FakeOvsdb::new();
    let owner = server.connect();
    let waiter = server.connect();
    let (owner_cb, _owner_events) = LockRecorder::new();
    let (waiter_cb, mut waiter_events) = LockRecorder::new();

    assert!(owner.lock(LOCK, owner_cb).await.unwrap());
    assert!(!waiter.lock(LOCK, waiter_cb).await.unwrap());

    owner.close();
    assert_eq!(next_event(&mut waiter_events).await, LockEvent::Locked(LOCK.into()));
}

#[tokio::test]
async fn test_steal_notifies_previous_owner() {
    let server = FakeOvsdb::new();
    let victim = server.connect();
    let thief = server.connect();
    let (victim_cb, mut victim_events) = LockRecorder::new();
    let (thief_cb, mut thief_events) = LockRecorder::new();

    assert!(victim.lock(LOCK, victim_cb).await.unwrap());
    next_event(&mut victim_events).await;

    assert!(thief.steal(LOCK, thief_cb).await.unwrap());
    assert_eq!(next_event(&mut thief_events).await, LockEvent::Locked(LOCK.into()));
    assert_eq!(next_event(&mut victim_events).await, LockEvent::Stolen(LOCK.into()));
    assert!(!victim.is_lock_held(LOCK));
    assert!(thief.is_lock_held(LOCK));

    // the victim's guarded transactions now fail
    let mut txn = victim.transact_builder(DB).await.unwrap();
    txn.add(Operation::assert(LOCK));
    let results = txn.execute().await.unwrap();
    assert_eq!(
        results.first_error().and_then(|(_, r)| r.error.clone()).as_deref(),
        Some("not owner")
    );
}
