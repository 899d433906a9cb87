use super::invoice::{Amount, InvoiceStatus, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a post-authorization operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Capture,
    Refund,
}

impl OperationKind {
    /// Status of a reservation that is not yet confirmed by the provider.
    pub fn provisional(&self) -> OperationStatus {
        match self {
            OperationKind::Capture => OperationStatus::Capturing,
            OperationKind::Refund => OperationStatus::Refunding,
        }
    }

    /// Status of a confirmed entry.
    pub fn terminal(&self) -> OperationStatus {
        match self {
            OperationKind::Capture => OperationStatus::Captured,
            OperationKind::Refund => OperationStatus::Refunded,
        }
    }

    /// Both statuses that count against the authorized amount in this direction.
    pub fn committed_statuses(&self) -> [OperationStatus; 2] {
        [self.provisional(), self.terminal()]
    }

    pub fn in_progress_status(&self) -> InvoiceStatus {
        match self {
            OperationKind::Capture => InvoiceStatus::Capturing,
            OperationKind::Refund => InvoiceStatus::Refunding,
        }
    }

    pub fn partial_status(&self) -> InvoiceStatus {
        match self {
            OperationKind::Capture => InvoiceStatus::PartialCapturing,
            OperationKind::Refund => InvoiceStatus::PartialRefunding,
        }
    }

    pub fn terminal_status(&self) -> InvoiceStatus {
        match self {
            OperationKind::Capture => InvoiceStatus::Captured,
            OperationKind::Refund => InvoiceStatus::Refunded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Capture => "capture",
            OperationKind::Refund => "refund",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Capturing,
    Captured,
    Refunding,
    Refunded,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Capturing => "capturing",
            OperationStatus::Captured => "captured",
            OperationStatus::Refunding => "refunding",
            OperationStatus::Refunded => "refunded",
        }
    }

    /// `*ing` entries are reservations, `*ed` entries are confirmed.
    pub fn is_provisional(&self) -> bool {
        matches!(self, OperationStatus::Capturing | OperationStatus::Refunding)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationStatus::Capturing | OperationStatus::Captured => OperationKind::Capture,
            OperationStatus::Refunding | OperationStatus::Refunded => OperationKind::Refund,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capturing" => Ok(OperationStatus::Capturing),
            "captured" => Ok(OperationStatus::Captured),
            "refunding" => Ok(OperationStatus::Refunding),
            "refunded" => Ok(OperationStatus::Refunded),
            other => Err(format!("unknown operation status {other:?}")),
        }
    }
}

/// One immutable monetary movement. Entries are appended, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-assigned, strictly increasing per store.
    pub sequence: i64,
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub status: OperationStatus,
}

/// Sums `entries` whose status is one of `statuses`; zero when none match.
pub fn sum_matching<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    statuses: &[OperationStatus],
) -> i64 {
    entries
        .into_iter()
        .filter(|entry| statuses.contains(&entry.status))
        .map(|entry| entry.amount.value())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sequence: i64, amount: i64, status: OperationStatus) -> LedgerEntry {
        LedgerEntry {
            sequence,
            transaction_id: TransactionId::parse("tx-1").unwrap(),
            amount: Amount::new(amount).unwrap(),
            status,
        }
    }

    #[test]
    fn test_kind_maps_to_its_statuses() {
        assert_eq!(OperationKind::Capture.provisional(), OperationStatus::Capturing);
        assert_eq!(OperationKind::Refund.terminal(), OperationStatus::Refunded);
        assert!(OperationStatus::Refunding.is_provisional());
        assert!(!OperationStatus::Captured.is_provisional());
        assert_eq!(OperationStatus::Refunded.kind(), OperationKind::Refund);
    }

    #[test]
    fn test_sum_matching_ignores_other_direction() {
        let entries = vec![
            entry(1, 30, OperationStatus::Capturing),
            entry(2, 70, OperationStatus::Captured),
            entry(3, 10, OperationStatus::Refunding),
        ];
        assert_eq!(
            sum_matching(&entries, &OperationKind::Capture.committed_statuses()),
            100
        );
        assert_eq!(sum_matching(&entries, &[OperationStatus::Refunded]), 0);
        assert_eq!(
            sum_matching(&Vec::<LedgerEntry>::new(), &[OperationStatus::Captured]),
            0
        );
    }

    #[test]
    fn test_kind_deserializes_lowercase() {
        let kind: OperationKind = serde_json::from_str("\"refund\"").unwrap();
        assert_eq!(kind, OperationKind::Refund);
    }
}
