use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DocumentEvent {
    Uploaded {
        id: String,
        owner_id: String,
        paged: bool,
    },
    Shared {
        id: String,
        owner_id: String,
        recipients: Vec<String>,
    },
    Unshared {
        id: String,
        owner_id: String,
    },
    Deleted {
        id: String,
        owner_id: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DocumentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Events sent with nobody listening are dropped.
    pub fn send(&self, event: DocumentEvent) {
        let _ = self.tx.send(event);
    }
}
