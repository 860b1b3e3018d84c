//! Broker link: the single MQTT connection shared by the whole bridge.
//!
//! Publishes and subscription changes fail fast while the link is down;
//! nothing is buffered for later delivery. Incoming messages are pushed
//! into the channel handed to [`MqttLink::connect`].

use async_trait::async_trait;
use chassis_lib::MqttConfig;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::BrokerError;

const DEFAULT_MQTT_PORT: u16 = 1883;
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// A message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe primitives the bridge needs from a broker connection.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;
}

/// Extract host and port from `mqtt://host[:port]` (or `tcp://`).
pub fn parse_broker_url(raw: &str) -> Result<(String, u16), BrokerError> {
    let url = Url::parse(raw)
        .map_err(|e| BrokerError::Connection(format!("invalid broker url {:?}: {}", raw, e)))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => {
            return Err(BrokerError::Connection(format!(
                "unsupported broker url scheme {:?}",
                other
            )))
        }
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| BrokerError::Connection(format!("broker url {:?} has no host", raw)))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}

/// Exponential reconnect backoff with jitter.
struct Backoff {
    initial_ms: u64,
    current_ms: u64,
    max_ms: u64,
}

impl Backoff {
    fn new(initial_ms: u64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            current_ms: initial_ms,
            max_ms,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        self.current_ms = (self.current_ms.saturating_mul(2)).min(self.max_ms);
        // +-25% jitter
        let jitter = delay / 4;
        if jitter == 0 {
            return Duration::from_millis(delay);
        }
        let offset = jitter_seed() % (jitter * 2);
        Duration::from_millis(delay - jitter + offset)
    }

    fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

fn jitter_seed() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1)
}

/// Topics the link has subscribed to, restored after every reconnect since
/// the broker session is clean.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    topics: Mutex<HashSet<String>>,
}

impl SubscriptionSet {
    fn topics(&self) -> MutexGuard<'_, HashSet<String>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, topic: &str) -> bool {
        self.topics().insert(topic.to_string())
    }

    pub fn remove(&self, topic: &str) -> bool {
        self.topics().remove(topic)
    }

    /// Topics to subscribe again after a reconnect, sorted.
    pub fn restore_list(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics().iter().cloned().collect();
        topics.sort();
        topics
    }
}

/// MQTT implementation of [`BrokerLink`] on top of `rumqttc`.
///
/// Requests go through `rumqttc`'s bounded request queue without waiting:
/// a full queue is reported as a failure of that request.
pub struct MqttLink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<SubscriptionSet>,
}

impl MqttLink {
    fn new(client: AsyncClient, connected: bool) -> Self {
        Self {
            client,
            connected: Arc::new(AtomicBool::new(connected)),
            subscriptions: Arc::new(SubscriptionSet::default()),
        }
    }

    /// Connect to the broker and start the background driver.
    ///
    /// Returns once the first CONNACK is received. Every PUBLISH received
    /// afterwards is offered to `inbound` without waiting; messages are
    /// dropped while it is full. The driver stops when the receiver is dropped.
    pub async fn connect(
        config: &MqttConfig,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<(Arc<Self>, JoinHandle<()>), BrokerError> {
        let (host, port) = parse_broker_url(&config.broker_url)?;

        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let timeout = Duration::from_secs(config.connect_timeout_secs);
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BrokerError::Connection(format!("no CONNACK from {}:{} within {:?}", host, port, timeout))
            })??;

        tracing::info!("Connected to MQTT broker {}:{} as {}", host, port, config.client_id);

        let link = Arc::new(Self::new(client, true));

        let driver = tokio::spawn(drive_event_loop(
            eventloop,
            link.client.clone(),
            link.connected.clone(),
            link.subscriptions.clone(),
            inbound,
            Backoff::new(config.reconnect_initial_ms, config.reconnect_max_ms),
        ));

        Ok((link, driver))
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Ask the broker to close the session.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!("MQTT disconnect request failed: {}", e);
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(BrokerError::Connection(format!("connection rejected: {:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(BrokerError::Connection(e.to_string())),
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<SubscriptionSet>,
    inbound: mpsc::Sender<InboundMessage>,
    mut backoff: Backoff,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    tracing::warn!("MQTT reconnect rejected: {:?}", ack.code);
                    continue;
                }
                backoff.reset();
                connected.store(true, Ordering::SeqCst);

                let restore = subscriptions.restore_list();
                tracing::info!("Reconnected to MQTT broker, restoring {} subscription(s)", restore.len());
                for topic in restore {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                        tracing::error!("Failed to restore subscription {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                match inbound.try_send(message) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(message)) => {
                        tracing::warn!("Inbound queue full, dropped message on {}", message.topic);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::info!("Inbound receiver dropped, stopping MQTT driver");
                        break;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    tracing::warn!("MQTT connection lost: {}", e);
                }
                let delay = backoff.next_delay();
                tracing::debug!("Reconnecting to MQTT broker in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        let added = self.subscriptions.insert(topic);
        if let Err(e) = self.client.try_subscribe(topic, QoS::AtLeastOnce) {
            if added {
                self.subscriptions.remove(topic);
            }
            return Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }
        tracing::info!("Subscribed to {}", topic);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        // While disconnected the clean session already dropped the topic
        self.subscriptions.remove(topic);
        if !self.is_connected() {
            tracing::debug!("Dropped subscription {} while disconnected", topic);
            return Ok(());
        }
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| BrokerError::Unsubscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!("Unsubscribed from {}", topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
