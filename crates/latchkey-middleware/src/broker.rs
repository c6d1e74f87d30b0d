//! The message broker contract.
//!
//! Latchkey never speaks a broker protocol directly.  The supervisor owns one
//! [`Broker`] instance and hands it to the stages that need to publish.
//!
//! # Overview
//!
//! - [`Broker`] – connect / subscribe / publish / disconnect, plus
//!   resubscription after a resumed connection.
//! - [`ConnectionEvent`] – interruption and resumption notifications, read
//!   from [`Broker::connection_events`].
//! - [`LoopbackBroker`][crate::loopback::LoopbackBroker] – in-process broker
//!   for tests and headless runs.
//! - [`RosbridgeBroker`][crate::rosbridge::RosbridgeBroker] – WebSocket
//!   client speaking the rosbridge JSON protocol.

use std::sync::Arc;

use async_trait::async_trait;
use latchkey_types::{LatchError, QoS};
use tokio::sync::broadcast;

/// Callback invoked once per inbound message with `(topic, raw_payload)`.
///
/// It may run on a connection-management task, so it must return quickly
/// and never block.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Result code reported when a connection is (re)established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl ConnectReturnCode {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConnectReturnCode::Accepted)
    }
}

/// Connection lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection dropped; the broker client will try to reconnect.
    Interrupted { error: String },
    /// The connection came back.  When `session_present` is `false` the
    /// server forgot our subscriptions and they must be re-established.
    Resumed {
        return_code: ConnectReturnCode,
        session_present: bool,
    },
}

/// Every broker client must implement this trait.
///
/// # Contract
///
/// * `subscribe` registers `handler` for every message whose topic matches
///   `filter` and returns the QoS granted by the server.
/// * `publish` is fire-and-forget with the delivery guarantee of `qos`.
/// * `resubscribe_existing` re-sends every registered subscription and
///   returns `(filter, granted)` pairs; `None` means the server rejected that
///   filter.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<(), LatchError>;

    async fn disconnect(&self) -> Result<(), LatchError>;

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<QoS, LatchError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LatchError>;

    async fn resubscribe_existing(&self) -> Result<Vec<(String, Option<QoS>)>, LatchError>;

    /// A fresh receiver for connection lifecycle notifications.
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

/// Broadcast capacity for connection events.
pub(crate) const EVENT_CAPACITY: usize = 16;
