//! Capability traits at the seams of the engine.
//!
//! Backends are selected at startup and injected as trait objects; the
//! engine never names a concrete store, lock or provider.

use super::invoice::{Amount, Invoice, InvoiceStatus, TransactionId};
use super::ledger::{LedgerEntry, OperationKind, OperationStatus};
use super::lock::{LockBackend, LockKey};
use crate::error::{ConfirmationError, LockError, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Durable invoices and the append-only ledger.
///
/// The methods on the store itself are the unsynchronized read paths; every
/// mutation after authorization goes through a [`LedgerUnit`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new invoice. Fails with `Duplicate` when the id is taken.
    async fn create_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;
    async fn invoice(&self, transaction_id: &TransactionId) -> Result<Invoice, StoreError>;
    /// Entries in creation order, optionally restricted to one status.
    async fn entries(
        &self,
        transaction_id: &TransactionId,
        status: Option<OperationStatus>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
    /// Starts an atomic unit of work.
    async fn begin(&self) -> Result<LedgerUnitBox, StoreError>;
}

/// One atomic unit of work against the ledger store.
///
/// Nothing written through a unit is visible to others before `commit`.
/// Dropping a unit without committing discards its writes.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Takes a transaction-scoped advisory lock, held until commit or rollback.
    async fn lock_advisory(&mut self, key: i64) -> Result<(), StoreError>;
    async fn get_invoice(&mut self, transaction_id: &TransactionId) -> Result<Invoice, StoreError>;
    /// Zero when no entry matches.
    async fn sum_entries(
        &mut self,
        transaction_id: &TransactionId,
        statuses: &[OperationStatus],
    ) -> Result<i64, StoreError>;
    async fn append_entry(
        &mut self,
        transaction_id: &TransactionId,
        amount: Amount,
        status: OperationStatus,
    ) -> Result<(), StoreError>;
    /// Fails with `NotFound` when no invoice matched.
    async fn set_invoice_status(
        &mut self,
        transaction_id: &TransactionId,
        status: InvoiceStatus,
    ) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Named mutual exclusion keyed by transaction id.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    fn backend(&self) -> LockBackend;

    /// Blocks until `key.requester` holds the lock for `key.transaction_id`.
    ///
    /// `unit` is the unit of work the critical section will run in; backends
    /// that are scoped to a storage transaction lock through it.
    async fn acquire(
        &self,
        key: &LockKey,
        unit: &mut dyn LedgerUnit,
    ) -> Result<LockGuardBox, LockError>;
}

/// Proof of holding a lock.
///
/// A guard dropped without `release` schedules its release on the runtime.
#[async_trait]
pub trait LockGuard: Send {
    fn key(&self) -> &LockKey;
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// The subset of a hierarchical coordination service the queue lock needs.
#[async_trait]
pub trait Coordination: Send + Sync {
    /// Creates a persistent node; an existing node is not an error.
    async fn ensure_node(&self, path: &str) -> Result<(), LockError>;
    /// Creates an ephemeral node named `prefix` + a 10-digit sequence number
    /// and returns its full path. Fails with `NoNode` when the parent is missing.
    async fn create_sequential(&self, prefix: &str, data: &[u8]) -> Result<String, LockError>;
    /// Child names (not paths) of `path`, unordered. `NoNode` when `path` is missing.
    async fn children(&self, path: &str) -> Result<Vec<String>, LockError>;
    /// Sets a one-shot watch that fires when `path` is deleted.
    ///
    /// Returns `None` when the node is already gone.
    async fn watch_deleted(&self, path: &str) -> Result<Option<oneshot::Receiver<()>>, LockError>;
    /// Deletes `path`; a missing node is not an error.
    async fn delete(&self, path: &str) -> Result<(), LockError>;
}

/// Opens dedicated sessions for session-scoped advisory locks.
#[async_trait]
pub trait AdvisorySessions: Send + Sync {
    async fn open(&self) -> Result<AdvisorySessionBox, LockError>;
}

/// A store session able to hold advisory locks beyond one transaction.
#[async_trait]
pub trait AdvisorySession: Send {
    /// Non-blocking; `true` when the lock was taken.
    async fn try_lock(&mut self, key: i64) -> Result<bool, LockError>;
    async fn unlock(&mut self, key: i64) -> Result<(), LockError>;
}

/// The external payment service provider.
#[async_trait]
pub trait PaymentServiceProvider: Send + Sync {
    async fn confirm(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
        kind: OperationKind,
    ) -> Result<(), ConfirmationError>;
}

pub type LedgerStoreBox = Box<dyn LedgerStore>;
pub type LedgerUnitBox = Box<dyn LedgerUnit>;
pub type LockCoordinatorBox = Box<dyn LockCoordinator>;
pub type LockGuardBox = Box<dyn LockGuard>;
pub type CoordinationRef = Arc<dyn Coordination>;
pub type AdvisorySessionsRef = Arc<dyn AdvisorySessions>;
pub type AdvisorySessionBox = Box<dyn AdvisorySession>;
pub type PaymentServiceProviderBox = Box<dyn PaymentServiceProvider>;
