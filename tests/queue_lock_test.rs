use paylock::domain::lock::LockKey;
use paylock::domain::ports::{Coordination, LedgerStore, LockCoordinator};
use paylock::error::LockError;
use paylock::infrastructure::coordination::{InMemoryCoordination, InMemorySession};
use paylock::infrastructure::in_memory::InMemoryLedgerStore;
use paylock::lock::QueueLock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;
use common::id;

const ROOT: &str = "/lock-post-auth-tx-1";

async fn wait_for_queue_len(observer: &InMemorySession, len: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while observer.children(ROOT).await.map(|c| c.len()).unwrap_or(0) != len {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("waiter never enqueued");
}

#[tokio::test]
async fn test_waiters_granted_in_ticket_order() {
    let service = InMemoryCoordination::new();
    let store = InMemoryLedgerStore::new();
    let observer = service.session();

    let holder_lock = QueueLock::new(Arc::new(service.session()));
    let mut unit = store.begin().await.unwrap();
    let holder = holder_lock
        .acquire(&LockKey::new(id("tx-1")), unit.as_mut())
        .await
        .unwrap();

    let granted = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for position in 0..8usize {
        let lock = QueueLock::new(Arc::new(service.session()));
        let store = store.clone();
        let granted = granted.clone();
        handles.push(tokio::spawn(async move {
            let mut unit = store.begin().await.unwrap();
            let guard = lock
                .acquire(&LockKey::new(id("tx-1")), unit.as_mut())
                .await
                .unwrap();
            granted.lock().unwrap().push(position);
            tokio::time::sleep(Duration::from_millis(1)).await;
            guard.release().await.unwrap();
        }));
        // Enqueue one at a time so tickets follow `position`.
        wait_for_queue_len(&observer, position + 2).await;
    }

    holder.release().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*granted.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_crashed_holder_unblocks_next_waiter() {
    let service = InMemoryCoordination::new();
    let store = InMemoryLedgerStore::new();

    let crashed = Arc::new(service.session());
    let holder_lock = QueueLock::new(crashed.clone());
    let mut unit = store.begin().await.unwrap();
    let holder = holder_lock
        .acquire(&LockKey::new(id("tx-1")), unit.as_mut())
        .await
        .unwrap();

    let waiter = {
        let lock = QueueLock::new(Arc::new(service.session()));
        let store = store.clone();
        tokio::spawn(async move {
            let mut unit = store.begin().await.unwrap();
            let guard = lock
                .acquire(&LockKey::new(id("tx-1")), unit.as_mut())
                .await
                .unwrap();
            guard.release().await.unwrap();
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    crashed.expire();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter still blocked after holder session expired")
        .unwrap();

    // The crashed holder can no longer talk to the service.
    assert!(matches!(
        holder.release().await,
        Err(LockError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_waiter_losing_its_session_fails_instead_of_hanging() {
    let service = InMemoryCoordination::new();
    let store = InMemoryLedgerStore::new();

    let holder_lock = QueueLock::new(Arc::new(service.session()));
    let mut unit = store.begin().await.unwrap();
    let holder = holder_lock
        .acquire(&LockKey::new(id("tx-1")), unit.as_mut())
        .await
        .unwrap();

    let waiter_session = Arc::new(service.session());
    let waiter = {
        let lock = QueueLock::new(waiter_session.clone());
        let store = store.clone();
        tokio::spawn(async move {
            let mut unit = store.begin().await.unwrap();
            lock.acquire(&LockKey::new(id("tx-1")), unit.as_mut())
                .await
                .map(|_| ())
        })
    };

    wait_for_queue_len(&service.session(), 2).await;
    waiter_session.expire();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter hung after losing its session")
        .unwrap();
    assert!(result.is_err());
    holder.release().await.unwrap();
}
