//! Feed registry

use crate::{FeedClient, IngestError, IngestResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Named feed clients, built once at startup and shared by every worker
#[derive(Clone)]
pub struct FeedRegistry {
    feeds: Arc<RwLock<HashMap<String, Arc<dyn FeedClient>>>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self {
            feeds: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a feed under `name`, replacing any previous one
    pub async fn register(&self, name: impl Into<String>, feed: Arc<dyn FeedClient>) {
        let mut feeds = self.feeds.write().await;
        feeds.insert(name.into(), feed);
    }

    pub async fn get(&self, name: &str) -> IngestResult<Arc<dyn FeedClient>> {
        let feeds = self.feeds.read().await;
        feeds
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::FeedError(format!("Unknown feed: {}", name)))
    }

    /// Registered names, sorted
    pub async fn list_feeds(&self) -> Vec<String> {
        let feeds = self.feeds.read().await;
        let mut names: Vec<String> = feeds.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::new()
    }
}
