#![allow(dead_code)]

use paylock::application::engine::PaymentEngine;
use paylock::domain::invoice::{Amount, TransactionId};
use paylock::domain::lock::LockBackend;
use paylock::domain::ports::LockCoordinatorBox;
use paylock::infrastructure::coordination::InMemoryCoordination;
use paylock::infrastructure::in_memory::InMemoryLedgerStore;
use paylock::infrastructure::psp::SimulatedPsp;
use paylock::lock::{AdvisoryLock, QueueLock, SessionAdvisoryLock};
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const BACKENDS: [LockBackend; 3] = [
    LockBackend::Queue,
    LockBackend::Advisory,
    LockBackend::SessionAdvisory,
];

pub fn id(value: &str) -> TransactionId {
    TransactionId::parse(value).unwrap()
}

pub fn amount(value: i64) -> Amount {
    Amount::new(value).unwrap()
}

/// Shared backing services; every engine built from it acts as a separate
/// service instance with its own coordination session.
#[derive(Clone, Default)]
pub struct Cluster {
    pub store: InMemoryLedgerStore,
    pub coordination: InMemoryCoordination,
    pub psp: SimulatedPsp,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self, backend: LockBackend) -> LockCoordinatorBox {
        match backend {
            LockBackend::Queue => Box::new(QueueLock::new(Arc::new(self.coordination.session()))),
            LockBackend::Advisory => Box::new(AdvisoryLock::new()),
            LockBackend::SessionAdvisory => Box::new(
                SessionAdvisoryLock::new(Arc::new(self.store.advisory_sessions()))
                    .with_retry_interval(Duration::from_millis(2)),
            ),
        }
    }

    pub fn engine(&self, backend: LockBackend) -> PaymentEngine {
        PaymentEngine::new(
            Box::new(self.store.clone()),
            self.locks(backend),
            Box::new(self.psp.clone()),
        )
    }
}

pub fn write_batch(path: &Path, rows: &[(&str, &str, &str)]) -> Result<(), Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["kind", "transaction_id", "amount"])?;
    for (kind, transaction_id, amount) in rows {
        wtr.write_record([kind, transaction_id, amount])?;
    }
    wtr.flush()?;
    Ok(())
}
