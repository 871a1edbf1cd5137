//! Connector registry: look up running connectors by id and stop them together on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to a running connector.
pub trait ChannelHandle: Send + Sync {
    /// Connector id (e.g. "telegram", "discord").
    fn id(&self) -> &str;
    /// Ask the connector to stop; its task finishes on its own.
    fn stop(&self);
}

/// Registry of connector ids to handles.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handle; a previous handle with the same id is stopped.
    pub async fn register(&self, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(handle.id().to_string(), handle) {
            old.stop();
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stop_all(&self) {
        let g = self.inner.read().await;
        for (id, handle) in g.iter() {
            log::debug!("stopping connector {}", id);
            handle.stop();
        }
    }
}
