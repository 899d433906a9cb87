use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller-assigned identifier of a payment, fixed at authorization time.
///
/// It doubles as a path segment of the queue lock, so it may not be empty
/// and may not contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    pub fn parse(value: impl Into<String>) -> Result<Self, EngineError> {
        let value = value.into();
        if value.is_empty() {
            return Err(EngineError::Validation(
                "transaction id must not be empty".to_string(),
            ));
        }
        if value.contains('/') || value.chars().any(char::is_whitespace) {
            return Err(EngineError::Validation(format!(
                "transaction id {value:?} contains '/' or whitespace"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransactionId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

/// A strictly positive amount in minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, EngineError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(EngineError::Validation(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = EngineError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| EngineError::Validation(format!("invalid amount {s:?}: {e}")))?;
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Authorized,
    Capturing,
    PartialCapturing,
    Captured,
    Refunding,
    PartialRefunding,
    Refunded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Authorized => "authorized",
            InvoiceStatus::Capturing => "capturing",
            InvoiceStatus::PartialCapturing => "partial_capturing",
            InvoiceStatus::Captured => "captured",
            InvoiceStatus::Refunding => "refunding",
            InvoiceStatus::PartialRefunding => "partial_refunding",
            InvoiceStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Captured | InvoiceStatus::Refunded)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorized" => Ok(InvoiceStatus::Authorized),
            "capturing" => Ok(InvoiceStatus::Capturing),
            "partial_capturing" => Ok(InvoiceStatus::PartialCapturing),
            "captured" => Ok(InvoiceStatus::Captured),
            "refunding" => Ok(InvoiceStatus::Refunding),
            "partial_refunding" => Ok(InvoiceStatus::PartialRefunding),
            "refunded" => Ok(InvoiceStatus::Refunded),
            other => Err(format!("unknown invoice status {other:?}")),
        }
    }
}

/// The authorized ceiling for one payment and its displayed status.
///
/// Only `status` ever changes after creation, and only under the
/// transaction's lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub status: InvoiceStatus,
}

impl Invoice {
    /// A freshly authorized invoice.
    pub fn authorize(transaction_id: TransactionId, amount: Amount) -> Self {
        Self {
            transaction_id,
            amount,
            status: InvoiceStatus::Authorized,
        }
    }
}
