//! Derives the displayed invoice status from ledger totals.
//!
//! Everything here is pure so the rules can be checked without a store.

use super::invoice::InvoiceStatus;
use super::ledger::OperationKind;

/// Ledger totals for one direction (capture or refund) of one invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionTotals {
    /// The invoice's authorized amount.
    pub ceiling: i64,
    /// Sum of confirmed (`*ed`) entries.
    pub confirmed: i64,
    /// Sum of provisional (`*ing`) entries.
    pub reserved: i64,
    /// Amount of a final increment that passed validation but is not yet
    /// confirmed, and therefore is not in the ledger.
    pub pending: i64,
}

impl DirectionTotals {
    pub fn committed(&self) -> i64 {
        self.confirmed + self.reserved
    }

    pub fn is_settled(&self) -> bool {
        self.confirmed > 0 && self.committed() >= self.ceiling
    }
}

/// Returns the status an invoice should display for `kind` given `totals`.
///
/// Falls back to `current` when the direction shows no activity at all.
pub fn project(kind: OperationKind, totals: DirectionTotals, current: InvoiceStatus) -> InvoiceStatus {
    let committed = totals.committed();
    if totals.is_settled() {
        kind.terminal_status()
    } else if committed > 0 {
        kind.partial_status()
    } else if totals.pending > 0 {
        kind.in_progress_status()
    } else {
        current
    }
}
