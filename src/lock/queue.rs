//! FIFO lock on top of a hierarchical coordination service.
//!
//! Each requester appends an ephemeral sequential node under a persistent
//! per-transaction root and waits for the node directly ahead of it to go
//! away. Session loss removes the node, so a crashed holder releases its
//! lock once the service expires its session.

use crate::domain::lock::{LockBackend, LockKey};
use crate::domain::ports::{CoordinationRef, LedgerUnit, LockCoordinator, LockGuard, LockGuardBox};
use crate::error::LockError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_ROOT_PREFIX: &str = "/lock-post-auth-";
const NODE_PREFIX: &str = "lock-";
const SEQUENCE_DIGITS: usize = 10;
const CREATE_ATTEMPTS: usize = 3;
const DELETE_ATTEMPTS: u32 = 5;
const DELETE_BACKOFF: Duration = Duration::from_millis(50);

pub struct QueueLock {
    coordination: CoordinationRef,
    root_prefix: String,
}

impl QueueLock {
    pub fn new(coordination: CoordinationRef) -> Self {
        Self {
            coordination,
            root_prefix: DEFAULT_ROOT_PREFIX.to_string(),
        }
    }

    pub fn with_root_prefix(mut self, root_prefix: impl Into<String>) -> Self {
        self.root_prefix = root_prefix.into();
        self
    }

    fn root(&self, key: &LockKey) -> String {
        format!("{}{}", self.root_prefix, key.transaction_id)
    }

    /// Creates this requester's node, re-creating the root if it disappears
    /// between the two calls.
    async fn enqueue(&self, root: &str, key: &LockKey) -> Result<QueueNode, LockError> {
        let prefix = format!("{root}/{NODE_PREFIX}");
        let data = key.requester.to_string();
        let mut attempt = 1;
        loop {
            self.coordination.ensure_node(root).await?;
            match self
                .coordination
                .create_sequential(&prefix, data.as_bytes())
                .await
            {
                Ok(path) => {
                    return Ok(QueueNode {
                        coordination: self.coordination.clone(),
                        path: Some(path),
                    });
                }
                Err(LockError::NoNode(parent)) if attempt < CREATE_ATTEMPTS => {
                    debug!(root = %parent, attempt, "lock root vanished, re-creating");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl LockCoordinator for QueueLock {
    fn backend(&self) -> LockBackend {
        LockBackend::Queue
    }

    async fn acquire(
        &self,
        key: &LockKey,
        _unit: &mut dyn LedgerUnit,
    ) -> Result<LockGuardBox, LockError> {
        let root = self.root(key);
        // Dropping `node` on any early return gives up the queue position.
        let node = self.enqueue(&root, key).await?;
        let own = node.name().to_string();
        let own_ticket = ticket(&own);

        loop {
            let children = match self.coordination.children(&root).await {
                Ok(children) => children,
                Err(LockError::NoNode(_)) => Vec::new(),
                Err(err) => return Err(err),
            };
            match position(&children, &own) {
                Position::Head => break,
                Position::Missing => return Err(LockError::NodeVanished(node.path().to_string())),
                Position::Behind(predecessor) => {
                    let predecessor = format!("{root}/{predecessor}");
                    debug!(
                        transaction_id = %key.transaction_id,
                        requester = %key.requester,
                        ticket = own_ticket,
                        waiting_on = %predecessor,
                        "waiting for lock"
                    );
                    if let Some(deleted) = self.coordination.watch_deleted(&predecessor).await? {
                        // A dropped sender also means the watch is gone; re-check either way.
                        let _ = deleted.await;
                    }
                }
            }
        }

        info!(
            transaction_id = %key.transaction_id,
            requester = %key.requester,
            ticket = own_ticket,
            "queue lock granted"
        );
        Ok(Box::new(QueueGuard {
            key: key.clone(),
            node,
        }))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Position {
    Head,
    Behind(String),
    Missing,
}

/// Sequence number encoded in the trailing digits of a child name.
pub fn ticket(name: &str) -> Option<u64> {
    let start = name.len().checked_sub(SEQUENCE_DIGITS)?;
    name.get(start..)?.parse().ok()
}

/// Where `own` stands among `children`, comparing tickets numerically.
fn position(children: &[String], own: &str) -> Position {
    let mut queue: Vec<(u64, &str)> = children
        .iter()
        .filter_map(|name| ticket(name).map(|t| (t, name.as_str())))
        .collect();
    queue.sort_unstable();

    match queue.iter().position(|(_, name)| *name == own) {
        None => Position::Missing,
        Some(0) => Position::Head,
        Some(index) => Position::Behind(queue[index - 1].1.to_string()),
    }
}

/// A requester's node. Deleted when dropped unless already deleted.
struct QueueNode {
    coordination: CoordinationRef,
    path: Option<String>,
}

impl QueueNode {
    fn path(&self) -> &str {
        self.path.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        let path = self.path();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// On failure the node keeps its path, so dropping it retries in the
    /// background.
    async fn delete(&mut self) -> Result<(), LockError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        delete_with_backoff(&self.coordination, path).await?;
        self.path = None;
        Ok(())
    }
}

impl Drop for QueueNode {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(path = %path, "no runtime to delete lock node, leaving it to session expiry");
            return;
        };
        let coordination = self.coordination.clone();
        runtime.spawn(async move {
            if let Err(err) = delete_with_backoff(&coordination, &path).await {
                warn!(path = %path, error = %err, "could not delete abandoned lock node");
            }
        });
    }
}

/// Deletes `path`, retrying transient failures with doubling backoff.
async fn delete_with_backoff(coordination: &CoordinationRef, path: &str) -> Result<(), LockError> {
    let mut backoff = DELETE_BACKOFF;
    let mut attempt = 1;
    loop {
        match coordination.delete(path).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < DELETE_ATTEMPTS => {
                debug!(path = %path, attempt, error = %err, "lock node delete failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

struct QueueGuard {
    key: LockKey,
    node: QueueNode,
}

#[async_trait]
impl LockGuard for QueueGuard {
    fn key(&self) -> &LockKey {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let QueueGuard { key, mut node } = *self;
        let path = node.path().to_string();
        node.delete().await?;
        debug!(
            transaction_id = %key.transaction_id,
            requester = %key.requester,
            node = %path,
            "queue lock released"
        );
        Ok(())
    }
}
