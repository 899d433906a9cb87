//! Advisory locks provided by the relational store.
//!
//! Both variants key the lock by a 63-bit hash of the transaction id so
//! independent processes agree on the key without sharing state. Neither
//! variant orders waiters.

use crate::domain::invoice::TransactionId;
use crate::domain::lock::{LockBackend, LockKey};
use crate::domain::ports::{
    AdvisorySessionBox, AdvisorySessionsRef, LedgerUnit, LockCoordinator, LockGuard, LockGuardBox,
};
use crate::error::LockError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Maps a transaction id to a non-negative `i64` advisory key.
///
/// The key is the xxh3 hash with the sign bit cleared. Services that derive
/// keys another way (FNV-1a, for instance) take different locks for the same
/// transaction, so every instance sharing a database must use this function.
pub fn advisory_key(transaction_id: &TransactionId) -> i64 {
    (xxh3_64(transaction_id.as_str().as_bytes()) & 0x7FFF_FFFF_FFFF_FFFF) as i64
}

/// Transaction-scoped advisory lock.
///
/// The lock is taken inside the unit of work that runs the critical section
/// and is released when that unit commits or rolls back.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdvisoryLock;

impl AdvisoryLock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LockCoordinator for AdvisoryLock {
    fn backend(&self) -> LockBackend {
        LockBackend::Advisory
    }

    async fn acquire(
        &self,
        key: &LockKey,
        unit: &mut dyn LedgerUnit,
    ) -> Result<LockGuardBox, LockError> {
        let lock_id = advisory_key(&key.transaction_id);
        unit.lock_advisory(lock_id).await?;
        info!(
            transaction_id = %key.transaction_id,
            requester = %key.requester,
            lock_id,
            "advisory lock granted"
        );
        Ok(Box::new(TransactionScopedGuard { key: key.clone() }))
    }
}

struct TransactionScopedGuard {
    key: LockKey,
}

#[async_trait]
impl LockGuard for TransactionScopedGuard {
    fn key(&self) -> &LockKey {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        // Already released by the unit's commit or rollback.
        Ok(())
    }
}

/// Session-scoped advisory lock.
///
/// Polls a non-blocking acquire on a dedicated session every
/// `retry_interval`, for the cases where the critical section spans more
/// than one storage transaction. The guard always unlocks, and a guard
/// dropped without `release` unlocks in the background.
pub struct SessionAdvisoryLock {
    sessions: AdvisorySessionsRef,
    retry_interval: Duration,
    timeout: Option<Duration>,
}

impl SessionAdvisoryLock {
    pub fn new(sessions: AdvisorySessionsRef) -> Self {
        Self {
            sessions,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Gives up with `LockError::Timeout` after waiting this long.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LockCoordinator for SessionAdvisoryLock {
    fn backend(&self) -> LockBackend {
        LockBackend::SessionAdvisory
    }

    async fn acquire(
        &self,
        key: &LockKey,
        _unit: &mut dyn LedgerUnit,
    ) -> Result<LockGuardBox, LockError> {
        let lock_id = advisory_key(&key.transaction_id);
        let mut session = self.sessions.open().await?;
        let started = Instant::now();

        while !session.try_lock(lock_id).await? {
            let waited = started.elapsed();
            if self.timeout.is_some_and(|limit| waited >= limit) {
                return Err(LockError::Timeout {
                    transaction_id: key.transaction_id.clone(),
                    waited,
                });
            }
            debug!(
                transaction_id = %key.transaction_id,
                requester = %key.requester,
                lock_id,
                "waiting to acquire advisory lock"
            );
            tokio::time::sleep(self.retry_interval).await;
        }

        info!(
            transaction_id = %key.transaction_id,
            requester = %key.requester,
            lock_id,
            waited_ms = started.elapsed().as_millis() as u64,
            "session advisory lock granted"
        );
        Ok(Box::new(SessionGuard {
            key: key.clone(),
            lock_id,
            session: Some(session),
        }))
    }
}

struct SessionGuard {
    key: LockKey,
    lock_id: i64,
    session: Option<AdvisorySessionBox>,
}

#[async_trait]
impl LockGuard for SessionGuard {
    fn key(&self) -> &LockKey {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut guard = self;
        let Some(mut session) = guard.session.take() else {
            return Ok(());
        };
        session.unlock(guard.lock_id).await?;
        debug!(
            transaction_id = %guard.key.transaction_id,
            requester = %guard.key.requester,
            lock_id = guard.lock_id,
            "session advisory lock released"
        );
        Ok(())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let lock_id = self.lock_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock_id, "no runtime to unlock advisory lock, dropping its session");
            return;
        };
        runtime.spawn(async move {
            if let Err(err) = session.unlock(lock_id).await {
                warn!(lock_id, error = %err, "could not unlock abandoned advisory lock");
            }
        });
    }
}
