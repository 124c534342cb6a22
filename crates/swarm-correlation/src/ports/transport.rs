//! Transport ports: where outbound messages go and inbound ones come from.
//!
//! Connection management and serialization live behind these traits. The
//! channel-backed implementations are enough to wire the engine to an
//! in-process broker or to tests.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;

/// Sends prepared outbound messages.
#[async_trait]
pub trait MessageSender<M>: Send + Sync {
    async fn send(&self, message: M) -> Result<(), TransportError>;
}

/// Yields inbound messages.
///
/// Several listener tasks may call `receive` concurrently on the same
/// receiver. `Ok(None)` means the stream is finished.
#[async_trait]
pub trait MessageReceiver<M>: Send + Sync {
    async fn receive(&self) -> Result<Option<M>, TransportError>;
}

/// Sender half over a tokio mpsc channel.
pub struct ChannelSender<M> {
    tx: mpsc::Sender<M>,
}

impl<M> ChannelSender<M> {
    pub fn new(tx: mpsc::Sender<M>) -> Self {
        Self { tx }
    }
}

impl<M> Clone for ChannelSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[async_trait]
impl<M: Send + 'static> MessageSender<M> for ChannelSender<M> {
    async fn send(&self, message: M) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Receiver half over a tokio mpsc channel, shareable across listeners.
pub struct ChannelReceiver<M> {
    rx: Mutex<mpsc::Receiver<M>>,
}

impl<M> ChannelReceiver<M> {
    pub fn new(rx: mpsc::Receiver<M>) -> Self {
        Self { rx: Mutex::new(rx) }
    }
}

#[async_trait]
impl<M: Send + 'static> MessageReceiver<M> for ChannelReceiver<M> {
    async fn receive(&self) -> Result<Option<M>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }
}

/// Connected in-memory sender/receiver pair.
pub fn channel<M>(capacity: usize) -> (ChannelSender<M>, ChannelReceiver<M>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSender::new(tx), ChannelReceiver::new(rx))
}
