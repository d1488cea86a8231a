use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

pub const PREVIEW_UPDATE_EVENT: &str = "image_preview_update";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to serialize preview event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewUpdate {
    pub node_id: Option<String>,
    pub image_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PreviewUpdate,
}

impl PreviewEvent {
    pub fn update(data: PreviewUpdate) -> Self {
        Self {
            event_type: String::from(PREVIEW_UPDATE_EVENT),
            data,
        }
    }

    pub fn to_frame(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub trait PreviewNotifier: Send + Sync {
    /// Returns how many subscribers received the update. Zero is not an error.
    fn publish(&self, update: PreviewUpdate) -> Result<usize, NotifyError>;
}

#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<PreviewEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PreviewEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl PreviewNotifier for BroadcastNotifier {
    fn publish(&self, update: PreviewUpdate) -> Result<usize, NotifyError> {
        let node_id = update.node_id.clone();
        match self.sender.send(PreviewEvent::update(update)) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                debug!(node_id = ?node_id, "no preview subscribers; update dropped");
                Ok(0)
            }
        }
    }
}
