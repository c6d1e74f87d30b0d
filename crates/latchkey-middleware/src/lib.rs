//! `latchkey-middleware` – The Messaging Link
//!
//! Carries lock commands in from the remote controller and lock state back
//! out, without caring which broker sits on the other side.
//!
//! # Modules
//!
//! - [`broker`] – the [`Broker`] trait, [`MessageHandler`] callbacks and
//!   [`ConnectionEvent`] lifecycle notifications.
//! - [`topic`] – the two topics latchkey uses plus MQTT wildcard matching.
//! - [`loopback`] – in-process [`LoopbackBroker`] with publish history.
//! - [`rosbridge`] – [`RosbridgeBroker`], a rosbridge JSON client over
//!   WebSocket with automatic reconnection.

pub mod broker;
pub mod loopback;
pub mod rosbridge;
pub mod topic;

pub use broker::{Broker, ConnectReturnCode, ConnectionEvent, MessageHandler};
pub use loopback::{LoopbackBroker, PublishedMessage};
pub use rosbridge::RosbridgeBroker;
pub use topic::{COMMAND_TOPIC, STATE_TOPIC};
