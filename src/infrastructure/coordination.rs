//! An in-process hierarchical coordination service.
//!
//! Mirrors the parts of a ZooKeeper ensemble the queue lock relies on:
//! persistent and ephemeral-sequential nodes, one-shot deletion watches and
//! sessions whose expiry removes every ephemeral node they own.

use crate::domain::ports::Coordination;
use crate::error::LockError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

type SessionId = u64;

struct Znode {
    data: Vec<u8>,
    owner: Option<SessionId>,
    next_child_sequence: u64,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Znode>,
    watches: HashMap<String, Vec<(SessionId, oneshot::Sender<()>)>>,
    next_session: SessionId,
}

impl Tree {
    fn remove(&mut self, path: &str) -> bool {
        let removed = self.nodes.remove(path).is_some();
        if let Some(watchers) = self.watches.remove(path) {
            for (_, watcher) in watchers {
                let _ = watcher.send(());
            }
        }
        removed
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

/// The shared "ensemble". Clients talk to it through [`InMemorySession`]s.
#[derive(Default, Clone)]
pub struct InMemoryCoordination {
    tree: Arc<Mutex<Tree>>,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new client session.
    pub fn session(&self) -> InMemorySession {
        let id = {
            let mut tree = self
                .tree
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tree.next_session += 1;
            tree.next_session
        };
        InMemorySession {
            tree: self.tree.clone(),
            id,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// One client session against an [`InMemoryCoordination`].
pub struct InMemorySession {
    tree: Arc<Mutex<Tree>>,
    id: SessionId,
    expired: Arc<AtomicBool>,
}

impl InMemorySession {
    fn tree(&self) -> Result<MutexGuard<'_, Tree>, LockError> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(LockError::Unavailable(format!(
                "session {} expired",
                self.id
            )));
        }
        self.tree
            .lock()
            .map_err(|_| LockError::Unavailable("coordination tree poisoned".to_string()))
    }

    /// Simulates session loss: every ephemeral node owned by this session is
    /// removed, watchers are notified, the session's own watches are dropped
    /// and all further calls fail.
    pub fn expire(&self) {
        if self.expired.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(mut tree) = self.tree.lock() else {
            return;
        };
        let owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            debug!(session = self.id, path = %path, "removing ephemeral node of expired session");
            tree.remove(&path);
        }
        for watchers in tree.watches.values_mut() {
            watchers.retain(|(owner, _)| *owner != self.id);
        }
    }

    /// Data stored at `path`, if the node exists.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        let tree = self.tree.lock().ok()?;
        tree.nodes.get(path).map(|node| node.data.clone())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.expire();
    }
}

#[async_trait]
impl Coordination for InMemorySession {
    async fn ensure_node(&self, path: &str) -> Result<(), LockError> {
        let mut tree = self.tree()?;
        tree.nodes.entry(path.to_string()).or_insert_with(|| Znode {
            data: Vec::new(),
            owner: None,
            next_child_sequence: 0,
        });
        Ok(())
    }

    async fn create_sequential(&self, prefix: &str, data: &[u8]) -> Result<String, LockError> {
        let mut tree = self.tree()?;
        let parent = parent_of(prefix).to_string();
        let sequence = match tree.nodes.get_mut(&parent) {
            Some(node) => {
                let sequence = node.next_child_sequence;
                node.next_child_sequence += 1;
                sequence
            }
            None => return Err(LockError::NoNode(parent)),
        };
        let path = format!("{prefix}{sequence:010}");
        tree.nodes.insert(
            path.clone(),
            Znode {
                data: data.to_vec(),
                owner: Some(self.id),
                next_child_sequence: 0,
            },
        );
        Ok(path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, LockError> {
        let tree = self.tree()?;
        if !tree.nodes.contains_key(path) {
            return Err(LockError::NoNode(path.to_string()));
        }
        let prefix = format!("{path}/");
        Ok(tree
            .nodes
            .range(prefix.clone()..)
            .take_while(|(child, _)| child.starts_with(&prefix))
            .filter_map(|(child, _)| {
                let name = &child[prefix.len()..];
                (!name.contains('/')).then(|| name.to_string())
            })
            .collect())
    }

    async fn watch_deleted(&self, path: &str) -> Result<Option<oneshot::Receiver<()>>, LockError> {
        let mut tree = self.tree()?;
        if !tree.nodes.contains_key(path) {
            return Ok(None);
        }
        let (sender, receiver) = oneshot::channel();
        tree.watches
            .entry(path.to_string())
            .or_default()
            .push((self.id, sender));
        Ok(Some(receiver))
    }

    async fn delete(&self, path: &str) -> Result<(), LockError> {
        let mut tree = self.tree()?;
        tree.remove(path);
        Ok(())
    }
}
