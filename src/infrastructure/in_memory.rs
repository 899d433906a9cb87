use crate::domain::invoice::{Amount, Invoice, InvoiceStatus, TransactionId};
use crate::domain::ledger::{sum_matching, LedgerEntry, OperationStatus};
use crate::domain::ports::{
    AdvisorySession, AdvisorySessionBox, AdvisorySessions, LedgerStore, LedgerUnit, LedgerUnitBox,
};
use crate::error::{LockError, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

#[derive(Default)]
struct LedgerState {
    invoices: HashMap<TransactionId, Invoice>,
    entries: Vec<LedgerEntry>,
    next_sequence: i64,
}

/// Advisory lock table shared by transaction- and session-scoped holders,
/// so both kinds exclude each other on the same key.
#[derive(Default, Clone)]
pub struct AdvisoryTable {
    slots: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl AdvisoryTable {
    fn slot(&self, key: i64) -> Option<Arc<AsyncMutex<()>>> {
        let mut slots = self.slots.lock().ok()?;
        Some(slots.entry(key).or_default().clone())
    }
}

/// A thread-safe in-memory ledger store.
///
/// Uses `Arc<RwLock<..>>` so clones share the same invoices and entries.
/// Suited to tests and single-process runs where durability is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    advisory: AdvisoryTable,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session-scoped advisory locks sharing this store's lock table.
    pub fn advisory_sessions(&self) -> InMemoryAdvisorySessions {
        InMemoryAdvisorySessions {
            table: self.advisory.clone(),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.invoices.contains_key(&invoice.transaction_id) {
            return Err(StoreError::Duplicate(invoice.transaction_id.clone()));
        }
        state
            .invoices
            .insert(invoice.transaction_id.clone(), invoice.clone());
        Ok(())
    }

    async fn invoice(&self, transaction_id: &TransactionId) -> Result<Invoice, StoreError> {
        let state = self.state.read().await;
        state
            .invoices
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(transaction_id.clone()))
    }

    async fn entries(
        &self,
        transaction_id: &TransactionId,
        status: Option<OperationStatus>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|entry| &entry.transaction_id == transaction_id)
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<LedgerUnitBox, StoreError> {
        Ok(Box::new(InMemoryLedgerUnit {
            state: self.state.clone(),
            advisory: self.advisory.clone(),
            held: Vec::new(),
            appended: Vec::new(),
            statuses: HashMap::new(),
        }))
    }
}

/// Buffers writes and applies them in one step on commit.
pub struct InMemoryLedgerUnit {
    state: Arc<RwLock<LedgerState>>,
    advisory: AdvisoryTable,
    held: Vec<OwnedMutexGuard<()>>,
    appended: Vec<(TransactionId, Amount, OperationStatus)>,
    statuses: HashMap<TransactionId, InvoiceStatus>,
}

#[async_trait]
impl LedgerUnit for InMemoryLedgerUnit {
    async fn lock_advisory(&mut self, key: i64) -> Result<(), StoreError> {
        let slot = self
            .advisory
            .slot(key)
            .ok_or_else(|| StoreError::Unavailable("advisory lock table poisoned".to_string()))?;
        self.held.push(slot.lock_owned().await);
        Ok(())
    }

    async fn get_invoice(&mut self, transaction_id: &TransactionId) -> Result<Invoice, StoreError> {
        let state = self.state.read().await;
        let mut invoice = state
            .invoices
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(transaction_id.clone()))?;
        if let Some(status) = self.statuses.get(transaction_id) {
            invoice.status = *status;
        }
        Ok(invoice)
    }

    async fn sum_entries(
        &mut self,
        transaction_id: &TransactionId,
        statuses: &[OperationStatus],
    ) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        let durable = sum_matching(
            state
                .entries
                .iter()
                .filter(|entry| &entry.transaction_id == transaction_id),
            statuses,
        );
        let buffered: i64 = self
            .appended
            .iter()
            .filter(|(id, _, status)| id == transaction_id && statuses.contains(status))
            .map(|(_, amount, _)| amount.value())
            .sum();
        Ok(durable + buffered)
    }

    async fn append_entry(
        &mut self,
        transaction_id: &TransactionId,
        amount: Amount,
        status: OperationStatus,
    ) -> Result<(), StoreError> {
        self.appended.push((transaction_id.clone(), amount, status));
        Ok(())
    }

    async fn set_invoice_status(
        &mut self,
        transaction_id: &TransactionId,
        status: InvoiceStatus,
    ) -> Result<(), StoreError> {
        if !self.state.read().await.invoices.contains_key(transaction_id) {
            return Err(StoreError::NotFound(transaction_id.clone()));
        }
        self.statuses.insert(transaction_id.clone(), status);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryLedgerUnit {
            state,
            held,
            appended,
            statuses,
            ..
        } = *self;
        {
            let mut state = state.write().await;
            for (transaction_id, amount, status) in appended {
                state.next_sequence += 1;
                let sequence = state.next_sequence;
                state.entries.push(LedgerEntry {
                    sequence,
                    transaction_id,
                    amount,
                    status,
                });
            }
            for (transaction_id, status) in statuses {
                if let Some(invoice) = state.invoices.get_mut(&transaction_id) {
                    invoice.status = status;
                }
            }
        }
        drop(held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Hands out in-memory sessions for session-scoped advisory locks.
#[derive(Clone)]
pub struct InMemoryAdvisorySessions {
    table: AdvisoryTable,
}

#[async_trait]
impl AdvisorySessions for InMemoryAdvisorySessions {
    async fn open(&self) -> Result<AdvisorySessionBox, LockError> {
        Ok(Box::new(InMemoryAdvisorySession {
            table: self.table.clone(),
            held: HashMap::new(),
        }))
    }
}

/// Locks held by a session are released when the session is dropped, the
/// way closing a database connection releases its advisory locks.
pub struct InMemoryAdvisorySession {
    table: AdvisoryTable,
    held: HashMap<i64, OwnedMutexGuard<()>>,
}

#[async_trait]
impl AdvisorySession for InMemoryAdvisorySession {
    async fn try_lock(&mut self, key: i64) -> Result<bool, LockError> {
        if self.held.contains_key(&key) {
            return Ok(true);
        }
        let slot = self
            .table
            .slot(key)
            .ok_or_else(|| LockError::Unavailable("advisory lock table poisoned".to_string()))?;
        match slot.try_lock_owned() {
            Ok(guard) => {
                self.held.insert(key, guard);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn unlock(&mut self, key: i64) -> Result<(), LockError> {
        self.held.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> TransactionId {
        TransactionId::parse(value).unwrap()
    }

    async fn store_with_invoice(amount: i64) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        store
            .create_invoice(&Invoice::authorize(id("tx-1"), Amount::new(amount).unwrap()))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_duplicate_invoice_rejected() {
        let store = store_with_invoice(100).await;
        let err = store
            .create_invoice(&Invoice::authorize(id("tx-1"), Amount::new(5).unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.invoice(&id("tx-1")).await.unwrap().amount.value(), 100);
    }

    #[tokio::test]
    async fn test_unit_writes_invisible_until_commit() {
        let store = store_with_invoice(100).await;
        let mut unit = store.begin().await.unwrap();
        unit.append_entry(&id("tx-1"), Amount::new(30).unwrap(), OperationStatus::Capturing)
            .await
            .unwrap();
        unit.set_invoice_status(&id("tx-1"), InvoiceStatus::PartialCapturing)
            .await
            .unwrap();

        // The unit reads its own writes.
        assert_eq!(
            unit.sum_entries(&id("tx-1"), &[OperationStatus::Capturing])
                .await
                .unwrap(),
            30
        );
        assert_eq!(
            unit.get_invoice(&id("tx-1")).await.unwrap().status,
            InvoiceStatus::PartialCapturing
        );
        // Others don't.
        assert!(store.entries(&id("tx-1"), None).await.unwrap().is_empty());

        unit.commit().await.unwrap();
        let entries = store.entries(&id("tx-1"), None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(
            store.invoice(&id("tx-1")).await.unwrap().status,
            InvoiceStatus::PartialCapturing
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = store_with_invoice(100).await;
        let mut unit = store.begin().await.unwrap();
        unit.append_entry(&id("tx-1"), Amount::new(30).unwrap(), OperationStatus::Capturing)
            .await
            .unwrap();
        unit.rollback().await.unwrap();
        assert!(store.entries(&id("tx-1"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_status_of_missing_invoice_is_not_found() {
        let store = InMemoryLedgerStore::new();
        let mut unit = store.begin().await.unwrap();
        let err = unit
            .set_invoice_status(&id("ghost"), InvoiceStatus::Captured)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_entries_filter_by_status() {
        let store = store_with_invoice(100).await;
        let mut unit = store.begin().await.unwrap();
        unit.append_entry(&id("tx-1"), Amount::new(30).unwrap(), OperationStatus::Capturing)
            .await
            .unwrap();
        unit.append_entry(&id("tx-1"), Amount::new(70).unwrap(), OperationStatus::Captured)
            .await
            .unwrap();
        unit.commit().await.unwrap();

        let captured = store
            .entries(&id("tx-1"), Some(OperationStatus::Captured))
            .await
            .unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].amount.value(), 70);
        assert!(store.entries(&id("tx-2"), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_advisory_lock_held_until_commit() {
        let store = InMemoryLedgerStore::new();
        let mut first = store.begin().await.unwrap();
        first.lock_advisory(7).await.unwrap();

        let mut session = store.advisory_sessions().open().await.unwrap();
        assert!(!session.try_lock(7).await.unwrap());
        assert!(session.try_lock(8).await.unwrap());

        first.commit().await.unwrap();
        assert!(session.try_lock(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_session_releases_its_locks() {
        let sessions = InMemoryLedgerStore::new().advisory_sessions();
        let mut holder = sessions.open().await.unwrap();
        assert!(holder.try_lock(1).await.unwrap());

        let mut other = sessions.open().await.unwrap();
        assert!(!other.try_lock(1).await.unwrap());
        drop(holder);
        assert!(other.try_lock(1).await.unwrap());
    }
}
