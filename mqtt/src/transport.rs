//! Transport boundary.
//!
//! The connection manager never talks to a network library directly. It asks
//! a [`Connector`] for a [`TransportHandle`] plus a stream of
//! [`TransportEvent`]s, which keeps it testable with a fake transport.

use crate::config::{ConnOptions, ConnectConfig};
use crate::error::Result;
use crate::types::{Message, QoS};
use bytes::Bytes;
use tokio::sync::mpsc;

/// Event emitted by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the connection (CONNACK).
    Connected,
    /// A message arrived on a subscribed topic.
    Message(Message),
    /// The connection was closed by the broker.
    Closed,
    /// The connection failed.
    Error(String),
}

/// Receiving side of a transport's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending side of a transport's event stream.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Handle to one open transport connection.
///
/// All calls are non-blocking requests; completion is not awaited.
pub trait TransportHandle: Send + Sync {
    /// Issue a wire-level SUBSCRIBE.
    fn subscribe(&self, pattern: &str, qos: QoS) -> Result<()>;

    /// Issue a wire-level UNSUBSCRIBE.
    fn unsubscribe(&self, pattern: &str) -> Result<()>;

    /// Publish a message.
    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<()>;

    /// Disconnect gracefully and release the connection.
    fn end(&self);
}

/// Opens transport connections.
pub trait Connector: Send + Sync {
    /// Start connecting. Returns immediately; `Connected` arrives on the
    /// event stream once the broker accepts.
    fn connect(
        &self,
        config: &ConnectConfig,
        options: &ConnOptions,
    ) -> Result<(Box<dyn TransportHandle>, EventReceiver)>;
}
