//! Publish/subscribe transport seam.
//!
//! The room session only talks to [`ChannelPort`]. Two implementations ship
//! with the crate:
//! - [`LocalChannelHub`] / [`LocalChannel`]: in-process broker, used by the
//!   relay server and by tests
//! - [`WsChannel`]: WebSocket client speaking the relay frame protocol

pub mod frame;
mod local;
mod ws;

pub use frame::{ClientFrame, RelayFrame};
pub use local::{LocalChannel, LocalChannelHub};
pub use ws::WsChannel;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by channel implementations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    /// Connection could not be established.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The channel is not connected (or was closed underneath us).
    #[error("Channel closed")]
    Closed,

    /// A message could not be handed to the transport.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The remote end spoke something we do not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Convenient Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Delivered on a subscription receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Raw payload published on the topic.
    Message(String),
    /// The subscription ended because the connection dropped.
    Closed,
    /// Non-fatal transport error.
    Error(String),
}

/// Pub/sub transport used by a room session.
///
/// Publishing is fire-and-forget: `Ok` means the transport accepted the
/// payload, not that any peer received it.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Opens the underlying connection.
    async fn connect(&self) -> ChannelResult<()>;

    /// Subscribes to `topic`; messages and lifecycle events arrive on the receiver.
    async fn subscribe(&self, topic: &str) -> ChannelResult<mpsc::Receiver<ChannelEvent>>;

    /// Publishes `payload` to every subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: String) -> ChannelResult<()>;

    /// Closes the connection and ends all subscriptions.
    async fn disconnect(&self);
}

/// Capacity of a single subscription's event queue.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;
