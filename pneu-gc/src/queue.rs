use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Envelope published to the asynchronous blob-deletion queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDeleteMessage {
    pub account_id: String,
    pub blob_ids: Vec<String>,
    #[serde(rename = "apiURL")]
    pub api_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue publish failure: {0}")]
    Publish(String),
}

/// Publisher side of the blob-deletion queue.
#[async_trait]
pub trait DeleteQueue: Send + Sync {
    async fn publish(&self, message: &BlobDeleteMessage) -> Result<(), QueueError>;
}

pub type DynDeleteQueue = Arc<dyn DeleteQueue>;

/// In-memory queue for tests and local tooling: published envelopes are
/// retained as JSON bodies, the way a real queue would deliver them.
#[derive(Debug, Default)]
pub struct MemQueue {
    messages: Mutex<VecDeque<String>>,
}

impl MemQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pop(&self) -> Option<String> {
        self.messages.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl DeleteQueue for MemQueue {
    async fn publish(&self, message: &BlobDeleteMessage) -> Result<(), QueueError> {
        let body = serde_json::to_string(message)
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        tracing::trace!(account = %message.account_id, blobs = message.blob_ids.len(), command = "queue_publish");
        self.messages.lock().unwrap().push_back(body);
        Ok(())
    }
}
