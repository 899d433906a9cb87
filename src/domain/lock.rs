use super::invoice::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one lock request; unique per critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId(Uuid);

impl RequesterId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a lock handle is identified by: the resource and who asks for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub transaction_id: TransactionId,
    pub requester: RequesterId,
}

impl LockKey {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            requester: RequesterId::generate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LockBackend {
    /// FIFO queue of ephemeral sequential nodes in a coordination service.
    Queue,
    /// Transaction-scoped advisory lock of the relational store.
    Advisory,
    /// Session-scoped advisory lock with bounded retry.
    SessionAdvisory,
}

impl fmt::Display for LockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockBackend::Queue => "queue",
            LockBackend::Advisory => "advisory",
            LockBackend::SessionAdvisory => "session-advisory",
        })
    }
}
