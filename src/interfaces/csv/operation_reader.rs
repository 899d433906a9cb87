use crate::domain::invoice::{Amount, TransactionId};
use crate::domain::ledger::OperationKind;
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Purchase,
    Capture,
    Refund,
}

impl RecordKind {
    /// The ledger direction, `None` for a purchase.
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            RecordKind::Purchase => None,
            RecordKind::Capture => Some(OperationKind::Capture),
            RecordKind::Refund => Some(OperationKind::Refund),
        }
    }
}

/// One row of a batch file: `kind,transaction_id,amount`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationRecord {
    pub kind: RecordKind,
    pub transaction_id: TransactionId,
    pub amount: Amount,
}

/// Reads batch operations from a CSV source.
///
/// Wraps `csv::Reader` and yields one `Result<OperationRecord>` per row,
/// trimming whitespace and tolerating ragged rows.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes the rows; a malformed row yields an error and
    /// does not stop the iteration.
    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
