//! rosbridge WebSocket broker client.
//!
//! [`RosbridgeBroker`] speaks the rosbridge v2 JSON protocol over a single
//! WebSocket:
//!
//! * **Outbound** – `{"op":"subscribe","topic":"/cmd/lock/state"}` and
//!   `{"op":"publish","topic":"/dt/lock/state","msg":{...}}`.
//! * **Inbound** – `{"op":"publish","topic":...,"msg":{...}}` frames are
//!   handed to the matching subscription handler with the serialised `msg`
//!   as the raw payload.
//!
//! rosbridge topic names carry a leading `/`; latchkey topic names do not.
//!
//! When the socket drops, a [`ConnectionEvent::Interrupted`] is emitted and a
//! background task reconnects after a fixed delay, then emits
//! [`ConnectionEvent::Resumed`] with `session_present: false` because
//! rosbridge keeps no session state across sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use latchkey_types::{LatchError, QoS};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, ConnectReturnCode, ConnectionEvent, EVENT_CAPACITY, MessageHandler};
use crate::topic::{has_wildcard, validate_filter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Prefix a latchkey topic with `/` for rosbridge.
pub fn to_ros_topic(topic: &str) -> String {
    if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("/{topic}")
    }
}

/// Strip the rosbridge leading `/`.
pub fn from_ros_topic(topic: &str) -> &str {
    topic.strip_prefix('/').unwrap_or(topic)
}

/// Build a rosbridge `subscribe` op.
pub fn subscribe_frame(topic: &str) -> String {
    json!({
        "op": "subscribe",
        "id": format!("subscribe:{topic}:{}", Uuid::new_v4()),
        "topic": to_ros_topic(topic),
    })
    .to_string()
}

/// Build a rosbridge `publish` op.  JSON payloads become `msg` directly;
/// anything else is wrapped as `{"data": "<utf-8 lossy>"}`.
pub fn publish_frame(topic: &str, payload: &[u8]) -> String {
    let msg = serde_json::from_slice::<Value>(payload)
        .unwrap_or_else(|_| json!({ "data": String::from_utf8_lossy(payload) }));
    json!({
        "op": "publish",
        "topic": to_ros_topic(topic),
        "msg": msg,
    })
    .to_string()
}

/// Decode an inbound frame.  Returns `(topic, payload)` for `publish` ops and
/// `None` for everything else.
pub fn parse_inbound(text: &str) -> Option<(String, Vec<u8>)> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("op").and_then(Value::as_str) != Some("publish") {
        return None;
    }
    let topic = frame.get("topic").and_then(Value::as_str)?;
    let msg = frame.get("msg")?;
    Some((from_ros_topic(topic).to_string(), msg.to_string().into_bytes()))
}

struct Subscription {
    topic: String,
    qos: QoS,
    handler: MessageHandler,
}

struct Shared {
    url: String,
    reconnect_delay: Duration,
    subscriptions: Mutex<Vec<Subscription>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    closing: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        match self.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send_text(&self, text: String) -> Result<(), LatchError> {
        let sender = self
            .outbound()
            .clone()
            .ok_or_else(|| LatchError::Broker("rosbridge not connected".to_string()))?;
        sender
            .send(Message::Text(text.into()))
            .map_err(|_| LatchError::Broker("rosbridge connection closed".to_string()))
    }

    fn deliver(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<MessageHandler> = self
            .subscriptions()
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        if handlers.is_empty() {
            debug!(topic, "rosbridge message without subscriber");
        }
        for handler in &handlers {
            handler(topic, payload);
        }
    }

    fn install(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound() = Some(tx);
        rx
    }

    /// Install a new outbound sender unless `disconnect` has been called.
    /// `closing` is checked under the outbound lock, the same lock
    /// `disconnect` holds while clearing it.
    fn reinstall(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        let mut slot = self.outbound();
        if self.closing.load(Ordering::Acquire) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx);
        Some(rx)
    }

    fn close(&self) {
        let mut slot = self.outbound();
        self.closing.store(true, Ordering::Release);
        *slot = None;
    }
}

/// rosbridge [`Broker`] over `tokio-tungstenite`.
pub struct RosbridgeBroker {
    shared: Arc<Shared>,
}

impl RosbridgeBroker {
    /// Create a client for `url` (e.g. `ws://localhost:9090`).  Nothing is
    /// dialled until [`Broker::connect`].
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                reconnect_delay,
                subscriptions: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                closing: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }
}

/// Pump one socket until it closes.  Returns the reason it ended.
async fn serve(
    shared: &Shared,
    ws: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
) -> String {
    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            out = outbound.recv() => {
                match out {
                    Some(msg) => {
                        if let Err(e) = ws_tx.send(msg).await {
                            return format!("send failed: {e}");
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return "closed locally".to_string();
                    }
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some((topic, payload)) = parse_inbound(text.as_str()) {
                            shared.deliver(&topic, &payload);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return "server closed the connection".to_string();
                    }
                    Some(Err(e)) => return format!("receive failed: {e}"),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Serve the current socket, then keep reconnecting until `disconnect`.
async fn run(shared: Arc<Shared>, mut ws: WsStream, mut outbound: mpsc::UnboundedReceiver<Message>) {
    loop {
        let reason = serve(&shared, ws, &mut outbound).await;
        if shared.closing.load(Ordering::Acquire) {
            debug!(reason = %reason, "rosbridge connection task finished");
            return;
        }
        warn!(url = %shared.url, reason = %reason, "rosbridge connection interrupted");
        *shared.outbound() = None;
        let _ = shared.events.send(ConnectionEvent::Interrupted { error: reason });

        loop {
            tokio::time::sleep(shared.reconnect_delay).await;
            if shared.closing.load(Ordering::Acquire) {
                return;
            }
            match connect_async(shared.url.as_str()).await {
                Ok((stream, _)) => {
                    let Some(rx) = shared.reinstall() else {
                        debug!(url = %shared.url, "disconnected during reconnect, dropping socket");
                        return;
                    };
                    ws = stream;
                    outbound = rx;
                    info!(url = %shared.url, "rosbridge connection resumed");
                    let _ = shared.events.send(ConnectionEvent::Resumed {
                        return_code: ConnectReturnCode::Accepted,
                        session_present: false,
                    });
                    break;
                }
                Err(e) => {
                    warn!(url = %shared.url, error = %e, "rosbridge reconnect failed");
                }
            }
        }
    }
}

#[async_trait]
impl Broker for RosbridgeBroker {
    async fn connect(&self) -> Result<(), LatchError> {
        let (ws, _) = connect_async(self.shared.url.as_str()).await.map_err(|e| {
            LatchError::Broker(format!("rosbridge connect to {}: {e}", self.shared.url))
        })?;
        self.shared.closing.store(false, Ordering::Release);
        let outbound = self.shared.install();
        tokio::spawn(run(Arc::clone(&self.shared), ws, outbound));
        info!(url = %self.shared.url, "rosbridge connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LatchError> {
        // Dropping the sender makes the connection task send a close frame.
        self.shared.close();
        info!(url = %self.shared.url, "rosbridge disconnected");
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<QoS, LatchError> {
        validate_filter(filter)?;
        if has_wildcard(filter) {
            return Err(LatchError::Broker(format!(
                "rosbridge does not support wildcard filter '{filter}'"
            )));
        }
        self.shared.send_text(subscribe_frame(filter))?;
        let mut subs = self.shared.subscriptions();
        subs.retain(|s| s.topic != filter);
        subs.push(Subscription {
            topic: filter.to_string(),
            qos,
            handler,
        });
        // rosbridge does not acknowledge subscriptions; the requested QoS is
        // reported back as granted.
        Ok(qos)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> Result<(), LatchError> {
        self.shared.send_text(publish_frame(topic, &payload))
    }

    async fn resubscribe_existing(&self) -> Result<Vec<(String, Option<QoS>)>, LatchError> {
        let pending: Vec<(String, QoS)> = self
            .shared
            .subscriptions()
            .iter()
            .map(|s| (s.topic.clone(), s.qos))
            .collect();
        let mut results = Vec::with_capacity(pending.len());
        for (topic, qos) in pending {
            match self.shared.send_text(subscribe_frame(&topic)) {
                Ok(()) => results.push((topic, Some(qos))),
                Err(e) => {
                    error!(topic = %topic, error = %e, "rosbridge resubscribe failed");
                    results.push((topic, None));
                }
            }
        }
        Ok(results)
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }
}
