use crate::domain::invoice::{Amount, Invoice, InvoiceStatus, TransactionId};
use crate::domain::ledger::{sum_matching, LedgerEntry, OperationKind, OperationStatus};
use crate::domain::lock::{LockBackend, LockKey};
use crate::domain::ports::{
    LedgerStoreBox, LedgerUnit, LedgerUnitBox, LockCoordinatorBox, LockGuardBox,
    PaymentServiceProviderBox,
};
use crate::domain::status::{project, DirectionTotals};
use crate::error::{EngineError, LockError};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of the validation phase of a capture or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub kind: OperationKind,
    pub amount: Amount,
    /// The amount completes the direction; confirm with the provider and
    /// then call [`PaymentEngine::finalize`].
    pub is_final: bool,
    /// Invoice status after the reservation.
    pub status: InvoiceStatus,
}

/// Report of a one-shot capture or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub amount: Amount,
    pub is_final: bool,
    pub status: InvoiceStatus,
}

/// Invoice with its committed totals per direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceSummary {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub status: InvoiceStatus,
    pub captured: i64,
    pub refunded: i64,
}

/// Processes captures and refunds against authorized invoices.
///
/// `PaymentEngine` owns the ledger store, the lock coordinator and the
/// payment service provider. Every state change runs as a critical section
/// keyed by the transaction id, inside one unit of work; the provider is
/// only ever called with no lock held.
pub struct PaymentEngine {
    store: LedgerStoreBox,
    locks: LockCoordinatorBox,
    psp: PaymentServiceProviderBox,
    lock_timeout: Option<Duration>,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine`.
    ///
    /// # Arguments
    ///
    /// * `store` - Invoices and the ledger.
    /// * `locks` - Mutual exclusion per transaction id.
    /// * `psp` - The provider confirming final captures and refunds.
    pub fn new(
        store: LedgerStoreBox,
        locks: LockCoordinatorBox,
        psp: PaymentServiceProviderBox,
    ) -> Self {
        Self {
            store,
            locks,
            psp,
            lock_timeout: None,
        }
    }

    /// Gives up waiting for a lock after `timeout` with `LockError::Timeout`.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_backend(&self) -> LockBackend {
        self.locks.backend()
    }

    /// Creates an invoice in `Authorized` status.
    pub async fn authorize(
        &self,
        transaction_id: TransactionId,
        amount: Amount,
    ) -> Result<Invoice, EngineError> {
        let invoice = Invoice::authorize(transaction_id, amount);
        self.store.create_invoice(&invoice).await?;
        info!(transaction_id = %invoice.transaction_id, amount = %amount, "invoice authorized");
        Ok(invoice)
    }

    /// Validates `amount` against the authorized ceiling and records it.
    ///
    /// A non-final amount is appended as a provisional entry. A final amount
    /// is not written: the caller confirms it with the provider and then
    /// calls [`finalize`](Self::finalize). Calling `reserve` again with the
    /// same final amount before finalization reports `is_final` again.
    pub async fn reserve(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
        kind: OperationKind,
    ) -> Result<Reservation, EngineError> {
        let (mut unit, guard) = self.enter(transaction_id).await?;
        let result = reserve_section(unit.as_mut(), transaction_id, amount, kind).await;
        let reservation = self.leave(unit, guard, result).await?;
        info!(
            transaction_id = %transaction_id,
            kind = %kind,
            amount = %amount,
            is_final = reservation.is_final,
            status = %reservation.status,
            "reserved"
        );
        Ok(reservation)
    }

    /// Records a provider-confirmed final amount.
    ///
    /// Re-validates under the lock. Finalizing a direction that is already
    /// settled is a no-op returning the current status.
    pub async fn finalize(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
        kind: OperationKind,
    ) -> Result<InvoiceStatus, EngineError> {
        let (mut unit, guard) = self.enter(transaction_id).await?;
        let result = finalize_section(unit.as_mut(), transaction_id, amount, kind).await;
        let status = self.leave(unit, guard, result).await?;
        info!(
            transaction_id = %transaction_id,
            kind = %kind,
            amount = %amount,
            status = %status,
            "finalized"
        );
        Ok(status)
    }

    /// Reserves a capture and, when it is final, confirms and finalizes it.
    pub async fn capture(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
    ) -> Result<Operation, EngineError> {
        self.operate(transaction_id, amount, OperationKind::Capture)
            .await
    }

    /// Reserves a refund and, when it is final, confirms and finalizes it.
    pub async fn refund(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
    ) -> Result<Operation, EngineError> {
        self.operate(transaction_id, amount, OperationKind::Refund)
            .await
    }

    /// Unsynchronized read; may observe a status that is about to change.
    pub async fn invoice(&self, transaction_id: &TransactionId) -> Result<Invoice, EngineError> {
        Ok(self.store.invoice(transaction_id).await?)
    }

    /// Ledger entries in creation order. Unsynchronized, like [`invoice`](Self::invoice).
    pub async fn entries(
        &self,
        transaction_id: &TransactionId,
        status: Option<OperationStatus>,
    ) -> Result<Vec<LedgerEntry>, EngineError> {
        // Surface a missing invoice rather than an empty list.
        self.store.invoice(transaction_id).await?;
        Ok(self.store.entries(transaction_id, status).await?)
    }

    pub async fn summary(&self, transaction_id: &TransactionId) -> Result<InvoiceSummary, EngineError> {
        let invoice = self.store.invoice(transaction_id).await?;
        let entries = self.store.entries(transaction_id, None).await?;
        Ok(InvoiceSummary {
            captured: sum_matching(&entries, &OperationKind::Capture.committed_statuses()),
            refunded: sum_matching(&entries, &OperationKind::Refund.committed_statuses()),
            transaction_id: invoice.transaction_id,
            amount: invoice.amount,
            status: invoice.status,
        })
    }

    async fn operate(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
        kind: OperationKind,
    ) -> Result<Operation, EngineError> {
        let reservation = self.reserve(transaction_id, amount, kind).await?;
        if !reservation.is_final {
            return Ok(Operation {
                kind,
                amount,
                is_final: false,
                status: reservation.status,
            });
        }

        if let Err(err) = self.psp.confirm(transaction_id, amount, kind).await {
            warn!(
                transaction_id = %transaction_id,
                kind = %kind,
                amount = %amount,
                error = %err,
                "confirmation failed, invoice left in progress"
            );
            return Err(err.into());
        }

        let status = self.finalize(transaction_id, amount, kind).await?;
        Ok(Operation {
            kind,
            amount,
            is_final: true,
            status,
        })
    }

    /// Opens a unit of work and takes the transaction's lock within it.
    async fn enter(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<(LedgerUnitBox, LockGuardBox), EngineError> {
        let key = LockKey::new(transaction_id.clone());
        let mut unit = self.store.begin().await?;
        let acquired = match self.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, self.locks.acquire(&key, unit.as_mut()))
                .await
                .unwrap_or_else(|_| {
                    Err(LockError::Timeout {
                        transaction_id: transaction_id.clone(),
                        waited: limit,
                    })
                }),
            None => self.locks.acquire(&key, unit.as_mut()).await,
        };
        match acquired {
            Ok(guard) => Ok((unit, guard)),
            Err(err) => {
                if let Err(rollback) = unit.rollback().await {
                    warn!(transaction_id = %transaction_id, error = %rollback, "rollback failed");
                }
                Err(err.into())
            }
        }
    }

    /// Ends a critical section: commits on success, rolls back otherwise,
    /// then releases the lock and hands back the section's result.
    async fn leave<T>(
        &self,
        unit: LedgerUnitBox,
        guard: LockGuardBox,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let outcome = match result {
            Ok(value) => unit.commit().await.map(|_| value).map_err(EngineError::from),
            Err(err) => {
                if let Err(rollback) = unit.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        };

        let transaction_id = guard.key().transaction_id.clone();
        let requester = guard.key().requester;
        if let Err(err) = guard.release().await {
            warn!(
                transaction_id = %transaction_id,
                requester = %requester,
                error = %err,
                "lock release failed"
            );
        } else {
            debug!(transaction_id = %transaction_id, requester = %requester, "lock released");
        }
        outcome
    }
}

async fn direction_totals(
    unit: &mut dyn LedgerUnit,
    invoice: &Invoice,
    kind: OperationKind,
) -> Result<DirectionTotals, EngineError> {
    let id = &invoice.transaction_id;
    Ok(DirectionTotals {
        ceiling: invoice.amount.value(),
        confirmed: unit.sum_entries(id, &[kind.terminal()]).await?,
        reserved: unit.sum_entries(id, &[kind.provisional()]).await?,
        pending: 0,
    })
}

async fn reserve_section(
    unit: &mut dyn LedgerUnit,
    transaction_id: &TransactionId,
    amount: Amount,
    kind: OperationKind,
) -> Result<Reservation, EngineError> {
    let invoice = unit.get_invoice(transaction_id).await?;
    let mut totals = direction_totals(unit, &invoice, kind).await?;
    let committed = totals.committed();

    if committed >= totals.ceiling {
        return Err(EngineError::AlreadySettled {
            transaction_id: transaction_id.clone(),
            kind,
        });
    }
    let remaining = totals.ceiling - committed;
    if amount.value() > remaining {
        debug!(
            transaction_id = %transaction_id,
            kind = %kind,
            amount = %amount,
            committed,
            "rejected, exceeds authorized amount"
        );
        return Err(EngineError::ExceedsAuthorizedAmount {
            transaction_id: transaction_id.clone(),
            kind,
            requested: amount.value(),
            committed,
            authorized: totals.ceiling,
        });
    }

    let is_final = amount.value() == remaining;
    if is_final {
        totals.pending = amount.value();
    } else {
        unit.append_entry(transaction_id, amount, kind.provisional())
            .await?;
        totals.reserved += amount.value();
    }

    let status = project(kind, totals, invoice.status);
    if status != invoice.status {
        unit.set_invoice_status(transaction_id, status).await?;
    }
    Ok(Reservation {
        kind,
        amount,
        is_final,
        status,
    })
}

async fn finalize_section(
    unit: &mut dyn LedgerUnit,
    transaction_id: &TransactionId,
    amount: Amount,
    kind: OperationKind,
) -> Result<InvoiceStatus, EngineError> {
    let invoice = unit.get_invoice(transaction_id).await?;
    let mut totals = direction_totals(unit, &invoice, kind).await?;
    let committed = totals.committed();

    if committed >= totals.ceiling {
        debug!(transaction_id = %transaction_id, kind = %kind, "already finalized");
        return Ok(invoice.status);
    }
    let remaining = totals.ceiling - committed;
    if amount.value() > remaining {
        return Err(EngineError::ExceedsAuthorizedAmount {
            transaction_id: transaction_id.clone(),
            kind,
            requested: amount.value(),
            committed,
            authorized: totals.ceiling,
        });
    }
    if amount.value() < remaining {
        return Err(EngineError::Validation(format!(
            "{kind} of {amount} does not complete {transaction_id} ({committed} of {} committed)",
            totals.ceiling
        )));
    }

    unit.append_entry(transaction_id, amount, kind.terminal())
        .await?;
    totals.confirmed += amount.value();

    let status = project(kind, totals, invoice.status);
    if status != invoice.status {
        unit.set_invoice_status(transaction_id, status).await?;
    }
    Ok(status)
}
