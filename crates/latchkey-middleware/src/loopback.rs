//! In-process broker.
//!
//! [`LoopbackBroker`] keeps its subscriptions in memory, delivers every
//! publish to the matching handlers (echo included, like a real broker) and
//! records a history that tests can inspect.  Remote traffic is simulated
//! with [`LoopbackBroker::inject`]; connection loss with
//! [`LoopbackBroker::interrupt`] and [`LoopbackBroker::resume`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use latchkey_types::{LatchError, QoS};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::broker::{Broker, ConnectReturnCode, ConnectionEvent, EVENT_CAPACITY, MessageHandler};
use crate::topic::{matches_filter, validate_filter};

/// One message that went through [`Broker::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub published_at: DateTime<Utc>,
}

impl PublishedMessage {
    /// Payload decoded as JSON, if it is JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

struct Subscription {
    filter: String,
    qos: QoS,
    handler: MessageHandler,
}

#[derive(Default)]
struct LoopbackState {
    connected: bool,
    subscriptions: Vec<Subscription>,
    history: Vec<PublishedMessage>,
    rejected: HashSet<String>,
}

/// In-memory [`Broker`].  Clones share the same state.
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<Mutex<LoopbackState>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBroker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(LoopbackState::default())),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Filters currently registered.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state()
            .subscriptions
            .iter()
            .map(|s| s.filter.clone())
            .collect()
    }

    /// Every message published so far, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().history.clone()
    }

    /// Messages published on exactly `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state()
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Poll until at least `count` messages were published on `topic`, or
    /// `timeout` elapses.  Returns what was published either way.
    pub async fn wait_for_published(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<PublishedMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.published_on(topic);
            if seen.len() >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Deliver a message as if it arrived from a remote publisher.
    ///
    /// Returns the number of handlers invoked.
    pub fn inject(&self, topic: &str, payload: impl AsRef<[u8]>) -> usize {
        let handlers: Vec<MessageHandler> = {
            let state = self.state();
            if !state.connected {
                debug!(topic, "loopback not connected, dropping injected message");
                return 0;
            }
            state
                .subscriptions
                .iter()
                .filter(|s| matches_filter(&s.filter, topic))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        let payload = payload.as_ref();
        for handler in &handlers {
            handler(topic, payload);
        }
        handlers.len()
    }

    /// Simulate a dropped connection.
    pub fn interrupt(&self, error: &str) {
        self.state().connected = false;
        let _ = self.events.send(ConnectionEvent::Interrupted {
            error: error.to_string(),
        });
    }

    /// Simulate the connection coming back.  With `session_present == false`
    /// the subscriptions stay registered locally but are expected to be
    /// re-sent through [`Broker::resubscribe_existing`].
    pub fn resume(&self, session_present: bool) {
        self.state().connected = true;
        let _ = self.events.send(ConnectionEvent::Resumed {
            return_code: ConnectReturnCode::Accepted,
            session_present,
        });
    }

    /// Make the next [`Broker::resubscribe_existing`] report `filter` as
    /// rejected by the server.
    pub fn reject_on_resubscribe(&self, filter: &str) {
        self.state().rejected.insert(filter.to_string());
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn connect(&self) -> Result<(), LatchError> {
        self.state().connected = true;
        info!("loopback broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LatchError> {
        self.state().connected = false;
        info!("loopback broker disconnected");
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<QoS, LatchError> {
        validate_filter(filter)?;
        let mut state = self.state();
        if !state.connected {
            return Err(LatchError::Broker(format!(
                "cannot subscribe to '{filter}': not connected"
            )));
        }
        state.subscriptions.retain(|s| s.filter != filter);
        state.subscriptions.push(Subscription {
            filter: filter.to_string(),
            qos,
            handler,
        });
        Ok(qos)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LatchError> {
        let handlers: Vec<MessageHandler> = {
            let mut state = self.state();
            if !state.connected {
                return Err(LatchError::Broker(format!(
                    "cannot publish to '{topic}': not connected"
                )));
            }
            state.history.push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                published_at: Utc::now(),
            });
            state
                .subscriptions
                .iter()
                .filter(|s| matches_filter(&s.filter, topic))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };
        for handler in &handlers {
            handler(topic, &payload);
        }
        Ok(())
    }

    async fn resubscribe_existing(&self) -> Result<Vec<(String, Option<QoS>)>, LatchError> {
        let mut state = self.state();
        let rejected = std::mem::take(&mut state.rejected);
        Ok(state
            .subscriptions
            .iter()
            .map(|s| {
                let granted = if rejected.contains(&s.filter) {
                    None
                } else {
                    Some(s.qos)
                };
                (s.filter.clone(), granted)
            })
            .collect())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
