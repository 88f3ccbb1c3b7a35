use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub key: String,
    pub received: u64,
    pub total: u64,
}

/// Single broadcast channel shared by every download; subscribers filter by key.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, key: &str, received: u64, total: u64) {
        let _ = self.sender.send(ProgressEvent {
            key: key.to_string(),
            received,
            total,
        });
    }

    pub fn subscribe(&self, key: &str) -> ProgressSubscription {
        ProgressSubscription {
            key: key.to_string(),
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct ProgressSubscription {
    key: String,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    /// Next event for this key; `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.key == self.key => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered event for this key, without waiting.
    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.key == self.key => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
