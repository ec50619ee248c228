use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// A tenant asked for dates; owner and admins should review.
    ReservationRequested { reservation_id: Ulid, property_id: Ulid },
    ReservationPaid { reservation_id: Ulid, property_id: Ulid },
    ReservationCancelled { reservation_id: Ulid, property_id: Ulid },
    /// Cancelled by the sweeper for staying unpaid past the grace period.
    ReservationExpired { reservation_id: Ulid, property_id: Ulid },
}

/// A notification together with who it was addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub recipient: String,
    pub message: Notification,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification channel for {0} is closed")]
    Closed(String),
}

/// Outgoing side channel. Must not block; the caller only logs failures.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, recipient: &str, message: &Notification) -> Result<(), NotifyError>;
}

/// Broadcast hub: one channel per recipient plus a firehose of everything.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
    firehose: broadcast::Sender<Envelope>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            firehose: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one recipient's notifications. Creates the channel if needed.
    pub fn subscribe(&self, recipient: &str) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(recipient.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every notification sent through the hub, addressed.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Envelope> {
        self.firehose.subscribe()
    }

    pub fn remove(&self, recipient: &str) {
        self.channels.remove(recipient);
    }
}

impl NotificationSink for NotifyHub {
    fn notify(&self, recipient: &str, message: &Notification) -> Result<(), NotifyError> {
        // Nobody listening on the firehose is fine.
        let _ = self.firehose.send(Envelope {
            recipient: recipient.to_string(),
            message: message.clone(),
        });
        let Some(sender) = self.channels.get(recipient).map(|s| s.value().clone()) else {
            return Ok(());
        };
        if sender.send(message.clone()).is_err() {
            // Every subscriber went away; forget the channel.
            self.channels.remove(recipient);
            return Err(NotifyError::Closed(recipient.to_string()));
        }
        Ok(())
    }
}
