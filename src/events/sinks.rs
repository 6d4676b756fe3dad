use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::EngineEvent;

/// Delivery failure for one subscriber; logged by the hub and never
/// propagated to the task or to other subscribers.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,
    #[error("subscriber queue full")]
    Backpressure,
    #[error("sink failure: {0}")]
    Sink(String),
}

/// Transport-agnostic delivery port.
///
/// WebSocket pushes, polling endpoints, and message buses all implement
/// this; the engine only ever sees the trait.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &EngineEvent) -> Result<(), DeliveryError>;
}

/// Stock sink backed by a bounded tokio mpsc channel.
///
/// Delivery is non-blocking: a full queue fails that one delivery instead
/// of stalling the publisher, keeping slow consumers isolated.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&self, event: &EngineEvent) -> Result<(), DeliveryError> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(DeliveryError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}
