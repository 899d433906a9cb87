//! ZooKeeper adapter for the queue lock.

use crate::domain::ports::Coordination;
use crate::error::LockError;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};
use zookeeper_client as zk;

fn unavailable(err: zk::Error) -> LockError {
    LockError::Unavailable(err.to_string())
}

/// One ZooKeeper session. Ephemeral lock nodes live as long as it does.
#[derive(Clone)]
pub struct ZkCoordination {
    client: zk::Client,
}

impl ZkCoordination {
    /// Connects to `endpoint` (`host:port[,host:port...]`).
    pub async fn connect(endpoint: &str) -> Result<Self, LockError> {
        let client = zk::Client::connect(endpoint).await.map_err(unavailable)?;
        info!(endpoint, "connected to zookeeper");
        Ok(Self { client })
    }

    pub fn from_client(client: zk::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Coordination for ZkCoordination {
    async fn ensure_node(&self, path: &str) -> Result<(), LockError> {
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        match self.client.create(path, &[], &options).await {
            Ok(_) | Err(zk::Error::NodeExists) => Ok(()),
            Err(zk::Error::NoNode) => Err(LockError::NoNode(path.to_string())),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn create_sequential(&self, prefix: &str, data: &[u8]) -> Result<String, LockError> {
        let options = zk::CreateMode::EphemeralSequential.with_acls(zk::Acls::anyone_all());
        match self.client.create(prefix, data, &options).await {
            Ok((_, sequence)) => {
                let path = format!("{prefix}{sequence}");
                debug!(path = %path, "created lock node");
                Ok(path)
            }
            Err(zk::Error::NoNode) => Err(LockError::NoNode(prefix.to_string())),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, LockError> {
        match self.client.list_children(path).await {
            Ok(children) => Ok(children),
            Err(zk::Error::NoNode) => Err(LockError::NoNode(path.to_string())),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn watch_deleted(&self, path: &str) -> Result<Option<oneshot::Receiver<()>>, LockError> {
        let (stat, watcher) = self
            .client
            .check_and_watch_stat(path)
            .await
            .map_err(|err| LockError::Watch {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        if stat.is_none() {
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        let path = path.to_string();
        tokio::spawn(async move {
            // Any event (deletion, data change, session loss) is a reason to re-list.
            let event = watcher.changed().await;
            debug!(path = %path, event = ?event.event_type, "watch fired");
            let _ = tx.send(());
        });
        Ok(Some(rx))
    }

    async fn delete(&self, path: &str) -> Result<(), LockError> {
        match self.client.delete(path, None).await {
            Ok(()) | Err(zk::Error::NoNode) => Ok(()),
            Err(err) => Err(unavailable(err)),
        }
    }
}
