use crate::domain::invoice::TransactionId;
use crate::domain::ledger::OperationKind;
use std::time::Duration;
use thiserror::Error;

/// Failures of the ledger store (invoices and ledger entries).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invoice {0} not found")]
    NotFound(TransactionId),
    #[error("invoice {0} already exists")]
    Duplicate(TransactionId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[cfg(feature = "store-postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Failures of the lock coordinator. None of these are business outcomes.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),
    #[error("lock node {0} vanished before it was granted")]
    NodeVanished(String),
    #[error("node {0} does not exist")]
    NoNode(String),
    #[error("could not watch {path}: {reason}")]
    Watch { path: String, reason: String },
    #[error("timed out after {waited:?} waiting for lock on {transaction_id}")]
    Timeout {
        transaction_id: TransactionId,
        waited: Duration,
    },
    #[error("lock storage failure: {0}")]
    Store(#[from] StoreError),
}

/// The external payment service provider rejected or could not complete a confirmation.
#[derive(Error, Debug)]
pub enum ConfirmationError {
    #[error("confirmation of {kind} for {transaction_id} failed: {reason}")]
    Failed {
        transaction_id: TransactionId,
        kind: OperationKind,
        reason: String,
    },
}

/// Errors surfaced by the capture/refund engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invoice {0} not found")]
    InvoiceNotFound(TransactionId),
    #[error("invoice {0} already exists")]
    DuplicateInvoice(TransactionId),
    #[error(
        "{kind} of {requested} on {transaction_id} would exceed the authorized amount ({committed} committed of {authorized})"
    )]
    ExceedsAuthorizedAmount {
        transaction_id: TransactionId,
        kind: OperationKind,
        requested: i64,
        committed: i64,
        authorized: i64,
    },
    #[error("{kind} on {transaction_id} is already settled")]
    AlreadySettled {
        transaction_id: TransactionId,
        kind: OperationKind,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    ConfirmationFailed(#[from] ConfirmationError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::InvoiceNotFound(id),
            StoreError::Duplicate(id) => EngineError::DuplicateInvoice(id),
            other => EngineError::Store(other),
        }
    }
}

/// How a request router should answer a failed engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Unprocessable,
    ServerError,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvoiceNotFound(_) => ErrorClass::NotFound,
            EngineError::DuplicateInvoice(_)
            | EngineError::ExceedsAuthorizedAmount { .. }
            | EngineError::AlreadySettled { .. }
            | EngineError::Validation(_) => ErrorClass::Unprocessable,
            EngineError::Lock(_) | EngineError::Store(_) | EngineError::ConfirmationFailed(_) => {
                ErrorClass::ServerError
            }
        }
    }

    /// Whether the same request may succeed when retried later.
    ///
    /// Business rejections are deterministic: retrying them with the same
    /// amount rejects again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Lock(LockError::Store(StoreError::NotFound(_))) => false,
            EngineError::Lock(_) | EngineError::ConfirmationFailed(_) => true,
            EngineError::Store(StoreError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// Top-level error of the binary and the CSV interfaces.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        PaymentError::Engine(err.into())
    }
}

impl From<LockError> for PaymentError {
    fn from(err: LockError) -> Self {
        PaymentError::Engine(err.into())
    }
}

pub type Result<T, E = PaymentError> = std::result::Result<T, E>;
