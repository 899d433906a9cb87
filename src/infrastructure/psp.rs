use crate::domain::invoice::{Amount, TransactionId};
use crate::domain::ledger::OperationKind;
use crate::domain::ports::PaymentServiceProvider;
use crate::error::ConfirmationError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// A confirmation the provider accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub kind: OperationKind,
}

#[derive(Default)]
struct PspState {
    failures_left: AtomicUsize,
    confirmations: Mutex<Vec<Confirmation>>,
}

/// Stand-in for the payment service provider.
///
/// Waits `latency` per call and can be told to fail the next few calls.
/// Clones share their state.
#[derive(Clone, Default)]
pub struct SimulatedPsp {
    latency: Duration,
    state: Arc<PspState>,
}

impl SimulatedPsp {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            state: Arc::default(),
        }
    }

    /// Makes the next `count` confirmations fail.
    pub fn fail_next(&self, count: usize) {
        self.state.failures_left.store(count, Ordering::SeqCst);
    }

    /// Accepted confirmations, oldest first.
    pub fn confirmations(&self) -> Vec<Confirmation> {
        self.state
            .confirmations
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PaymentServiceProvider for SimulatedPsp {
    async fn confirm(
        &self,
        transaction_id: &TransactionId,
        amount: Amount,
        kind: OperationKind,
    ) -> Result<(), ConfirmationError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let should_fail = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ConfirmationError::Failed {
                transaction_id: transaction_id.clone(),
                kind,
                reason: "simulated provider failure".to_string(),
            });
        }

        info!(transaction_id = %transaction_id, amount = %amount, kind = %kind, "provider confirmed");
        if let Ok(mut confirmations) = self.state.confirmations.lock() {
            confirmations.push(Confirmation {
                transaction_id: transaction_id.clone(),
                amount,
                kind,
            });
        }
        Ok(())
    }
}
