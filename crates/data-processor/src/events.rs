//! Published streams and processing error events

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Stage at which a response was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataErrorKind {
    ParsingFailed,
    ValidationFailed,
    ProcessingFailed,
}

impl fmt::Display for DataErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DataErrorKind::ParsingFailed => "parsing failed",
            DataErrorKind::ValidationFailed => "validation failed",
            DataErrorKind::ProcessingFailed => "processing failed",
        };
        f.write_str(label)
    }
}

/// A response that did not produce a record
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind} for {command}: {message}")]
pub struct DataError {
    pub kind: DataErrorKind,
    /// PID key, when the command could be parsed
    pub pid: Option<String>,
    pub command: String,
    pub message: String,
    /// Unix ms
    pub timestamp_ms: u64,
}

/// Multi-subscriber broadcast that replays the latest item to new subscribers
pub struct BroadcastHub<T> {
    tx: broadcast::Sender<T>,
    latest: RwLock<Option<T>>,
}

impl<T: Clone> BroadcastHub<T> {
    /// Create a hub buffering up to `capacity` items per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: RwLock::new(None),
        }
    }

    /// Publish to every current subscriber
    pub fn publish(&self, item: T) {
        // Held across the send so a concurrent subscribe sees either the
        // replay or the live item, never both or neither
        let mut latest = self.latest.write();
        *latest = Some(item.clone());
        let _ = self.tx.send(item);
    }

    /// Subscribe from now on, starting with the latest item if any
    pub fn subscribe(&self) -> Subscription<T> {
        let latest = self.latest.read();
        Subscription {
            replay: latest.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Most recently published item
    pub fn latest(&self) -> Option<T> {
        self.latest.read().clone()
    }
}

/// One subscriber's view of a [`BroadcastHub`]
pub struct Subscription<T> {
    replay: Option<T>,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Next item; items dropped while this subscriber lagged are skipped.
    /// `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(item) = self.replay.take() {
            return Some(item);
        }
        loop {
            match self.rx.recv().await {
                Ok(item) => return Some(item),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, skipped {} items", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next item if one is ready
    pub fn try_recv(&mut self) -> Option<T> {
        if let Some(item) = self.replay.take() {
            return Some(item);
        }
        loop {
            match self.rx.try_recv() {
                Ok(item) => return Some(item),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
