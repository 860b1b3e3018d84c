//! Connection multiplexer.
//!
//! One task owns the table of bound browser connections and the per-device
//! status topic bindings. Binds, unbinds and broker messages all enter
//! through its queues, so subscription reference counts never race.
//!
//! Broker subscribe/unsubscribe calls run on a separate worker, in the order
//! the multiplexer issued them, and report back through a queue. Fan-out
//! never waits on the broker.
//!
//! A broker subscription for a device's status topic exists exactly while at
//! least one connection is bound to that device.

use chassis_lib::DeviceId;
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::broker::{BrokerLink, InboundMessage};
use crate::error::{BrokerError, MultiplexerError};

pub type ConnectionId = u64;

/// Status object forwarded to browsers, shared between all recipients.
pub type StatusFrame = Arc<Value>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultiplexerStats {
    /// Number of bound connections
    pub connections: usize,
    /// Bound connections per device (the status topic reference count)
    pub devices: BTreeMap<String, usize>,
}

type BindReply = oneshot::Sender<Result<(), MultiplexerError>>;

enum Command {
    Bind {
        id: ConnectionId,
        device: DeviceId,
        sink: mpsc::Sender<StatusFrame>,
        reply: BindReply,
    },
    Unbind {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<MultiplexerStats>,
    },
}

enum SubscriptionOp {
    Subscribe { device: DeviceId, topic: String },
    Unsubscribe { device: DeviceId, topic: String },
}

struct Subscribed {
    device: DeviceId,
    result: Result<(), BrokerError>,
}

/// Cloneable entry point to the multiplexer task.
#[derive(Clone)]
pub struct MultiplexerHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl MultiplexerHandle {
    /// Start the multiplexer task.
    ///
    /// `inbound` carries messages delivered by the broker link. The task
    /// stops once every handle has been dropped.
    pub fn spawn(
        link: Arc<dyn BrokerLink>,
        status_prefix: impl Into<String>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (subscribed_tx, subscribed_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_subscriptions(link, ops_rx, subscribed_tx));

        let multiplexer = Multiplexer {
            ops: ops_tx,
            status_prefix: status_prefix.into(),
            connections: HashMap::new(),
            bindings: HashMap::new(),
            topics: HashMap::new(),
        };
        let task = tokio::spawn(multiplexer.run(commands_rx, inbound, subscribed_rx));
        let handle = Self {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, task)
    }

    /// Allocate an id for a new connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind connection `id` to `device`. Status frames for the device are
    /// offered to `sink` without blocking.
    ///
    /// Subscribes to the device's status topic if this is the first bound
    /// connection for it; a failed subscription leaves nothing bound.
    /// Dropping the returned future before it resolves leaves nothing bound
    /// either.
    pub async fn bind(
        &self,
        id: ConnectionId,
        device: DeviceId,
        sink: mpsc::Sender<StatusFrame>,
    ) -> Result<(), MultiplexerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Bind {
                id,
                device,
                sink,
                reply,
            })
            .map_err(|_| MultiplexerError::Stopped)?;
        response.await.map_err(|_| MultiplexerError::Stopped)?
    }

    /// Release connection `id`. Unknown or already released ids are ignored.
    pub fn unbind(&self, id: ConnectionId) {
        if self.commands.send(Command::Unbind { id }).is_err() {
            tracing::debug!("Multiplexer stopped before unbinding connection {}", id);
        }
    }

    pub async fn stats(&self) -> Result<MultiplexerStats, MultiplexerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| MultiplexerError::Stopped)?;
        response.await.map_err(|_| MultiplexerError::Stopped)
    }
}

/// Runs broker subscription changes one at a time, in issue order.
async fn run_subscriptions(
    link: Arc<dyn BrokerLink>,
    mut ops: mpsc::UnboundedReceiver<SubscriptionOp>,
    subscribed: mpsc::UnboundedSender<Subscribed>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            SubscriptionOp::Subscribe { device, topic } => {
                let result = link.subscribe(&topic).await;
                if subscribed.send(Subscribed { device, result }).is_err() {
                    break;
                }
            }
            SubscriptionOp::Unsubscribe { device, topic } => {
                match link.unsubscribe(&topic).await {
                    Ok(()) => tracing::info!("Device {} has no viewers, released {}", device, topic),
                    Err(e) => tracing::warn!(
                        "Failed to unsubscribe {} for device {}: {}",
                        topic,
                        device,
                        e
                    ),
                }
            }
        }
    }
}

struct BoundConnection {
    device: DeviceId,
    sink: mpsc::Sender<StatusFrame>,
}

struct PendingBind {
    id: ConnectionId,
    sink: mpsc::Sender<StatusFrame>,
    reply: BindReply,
}

struct TopicBinding {
    topic: String,
    connections: HashSet<ConnectionId>,
    // Binds waiting for the broker to acknowledge the subscription
    pending: Vec<PendingBind>,
    subscribed: bool,
}

struct Multiplexer {
    ops: mpsc::UnboundedSender<SubscriptionOp>,
    status_prefix: String,
    connections: HashMap<ConnectionId, BoundConnection>,
    bindings: HashMap<DeviceId, TopicBinding>,
    // Filled when subscribing, so delivered topics are never parsed
    topics: HashMap<String, DeviceId>,
}

impl Multiplexer {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut subscribed: mpsc::UnboundedReceiver<Subscribed>,
    ) {
        let mut inbound_open = true;
        loop {
            tokio::select! {
                biased;
                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => self.on_broker_message(message),
                    None => {
                        tracing::warn!("Broker message stream closed");
                        inbound_open = false;
                    }
                },
                Some(done) = subscribed.recv() => self.on_subscribed(done),
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.unbind(id);
        }
        tracing::info!("Multiplexer stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Bind {
                id,
                device,
                sink,
                reply,
            } => self.bind(id, device, sink, reply),
            Command::Unbind { id } => self.unbind(id),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn is_known(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
            || self
                .bindings
                .values()
                .any(|binding| binding.pending.iter().any(|pending| pending.id == id))
    }

    fn bind(
        &mut self,
        id: ConnectionId,
        device: DeviceId,
        sink: mpsc::Sender<StatusFrame>,
        reply: BindReply,
    ) {
        if self.is_known(id) {
            let _ = reply.send(Err(MultiplexerError::AlreadyBound(id)));
            return;
        }

        let pending = PendingBind { id, sink, reply };
        match self.bindings.entry(device.clone()) {
            Entry::Occupied(entry) => {
                let binding = entry.into_mut();
                if binding.subscribed {
                    Self::activate(&mut self.connections, binding, &device, pending);
                } else {
                    binding.pending.push(pending);
                }
            }
            Entry::Vacant(entry) => {
                let topic = device.topic(&self.status_prefix);
                self.topics.insert(topic.clone(), device.clone());
                entry.insert(TopicBinding {
                    topic: topic.clone(),
                    connections: HashSet::new(),
                    pending: vec![pending],
                    subscribed: false,
                });
                // The worker only stops together with this task
                let _ = self.ops.send(SubscriptionOp::Subscribe { device, topic });
            }
        }
    }

    /// Move a bind into the live table, unless its caller already gave up.
    fn activate(
        connections: &mut HashMap<ConnectionId, BoundConnection>,
        binding: &mut TopicBinding,
        device: &DeviceId,
        pending: PendingBind,
    ) {
        if pending.reply.send(Ok(())).is_err() {
            tracing::debug!("Connection {} left before its bind completed", pending.id);
            return;
        }
        binding.connections.insert(pending.id);
        tracing::debug!(
            "Connection {} bound to device {} (refs: {})",
            pending.id,
            device,
            binding.connections.len()
        );
        connections.insert(
            pending.id,
            BoundConnection {
                device: device.clone(),
                sink: pending.sink,
            },
        );
    }

    fn on_subscribed(&mut self, done: Subscribed) {
        let Subscribed { device, result } = done;

        match result {
            Ok(()) => {
                let Some(binding) = self.bindings.get_mut(&device) else {
                    return;
                };
                binding.subscribed = true;
                tracing::info!("Device {} status topic {} now watched", device, binding.topic);
                for pending in std::mem::take(&mut binding.pending) {
                    Self::activate(&mut self.connections, binding, &device, pending);
                }
                if binding.connections.is_empty() {
                    self.release(&device);
                }
            }
            Err(e) => {
                let Some(binding) = self.bindings.remove(&device) else {
                    return;
                };
                self.topics.remove(&binding.topic);
                tracing::warn!("Subscribing to {} failed: {}", binding.topic, e);
                for pending in binding.pending {
                    let _ = pending
                        .reply
                        .send(Err(MultiplexerError::Subscribe(e.clone())));
                }
            }
        }
    }

    fn unbind(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(&id) else {
            return;
        };

        let last = match self.bindings.get_mut(&connection.device) {
            Some(binding) => {
                binding.connections.remove(&id);
                binding.connections.is_empty() && binding.pending.is_empty()
            }
            None => false,
        };
        tracing::debug!("Connection {} unbound from device {}", id, connection.device);

        if last {
            self.release(&connection.device);
        }
    }

    fn release(&mut self, device: &DeviceId) {
        if let Some(binding) = self.bindings.remove(device) {
            self.topics.remove(&binding.topic);
            let _ = self.ops.send(SubscriptionOp::Unsubscribe {
                device: device.clone(),
                topic: binding.topic,
            });
        }
    }

    fn on_broker_message(&mut self, message: InboundMessage) {
        let Some(device) = self.topics.get(&message.topic).cloned() else {
            tracing::debug!("Dropping message on unwatched topic {}", message.topic);
            return;
        };

        let status = match serde_json::from_slice::<Value>(&message.payload) {
            Ok(status @ Value::Object(_)) => status,
            Ok(_) => {
                tracing::warn!("Dropping non-object status from device {}", device);
                return;
            }
            Err(e) => {
                tracing::warn!("Dropping malformed status from device {}: {}", device, e);
                return;
            }
        };

        let frame: StatusFrame = Arc::new(status);
        let mut closed = Vec::new();
        if let Some(binding) = self.bindings.get(&device) {
            for id in &binding.connections {
                let Some(connection) = self.connections.get(id) else {
                    continue;
                };
                match connection.sink.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!("Connection {} is lagging, skipped a status frame", id);
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            tracing::info!("Connection {} closed during fan-out", id);
            self.unbind(id);
        }
    }

    fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            connections: self.connections.len(),
            devices: self
                .bindings
                .iter()
                .filter(|(_, binding)| binding.subscribed)
                .map(|(device, binding)| (device.to_string(), binding.connections.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, RecordingLink};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    const PREFIX: &str = "CarStatus_";

    struct Fixture {
        link: Arc<RecordingLink>,
        handle: MultiplexerHandle,
        inbound: mpsc::Sender<InboundMessage>,
    }

    fn fixture() -> Fixture {
        let link = Arc::new(RecordingLink::new());
        let (inbound, inbound_rx) = mpsc::channel(16);
        let (handle, _task) = MultiplexerHandle::spawn(link.clone(), PREFIX, inbound_rx);
        Fixture {
            link,
            handle,
            inbound,
        }
    }

    fn device(raw: &str) -> DeviceId {
        DeviceId::parse(raw, 3).unwrap()
    }

    impl Fixture {
        async fn connect(&self, raw: &str, capacity: usize) -> (ConnectionId, mpsc::Receiver<StatusFrame>) {
            let id = self.handle.next_connection_id();
            let (tx, rx) = mpsc::channel(capacity);
            self.handle.bind(id, device(raw), tx).await.unwrap();
            (id, rx)
        }

        async fn deliver(&self, topic: &str, payload: &[u8]) {
            self.inbound
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .await
                .unwrap();
        }

        /// Round-trip through the task so everything queued before is handled.
        async fn settle(&self) -> MultiplexerStats {
            self.handle.stats().await.unwrap()
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<StatusFrame>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open");
        (*frame).clone()
    }

    #[tokio::test]
    async fn test_subscribe_on_first_bind_unsubscribe_on_last_unbind() {
        let f = fixture();

        let (a, _rx_a) = f.connect("001", 4).await;
        let (b, _rx_b) = f.connect("001", 4).await;
        assert_eq!(f.link.subscribes(), vec!["CarStatus_001".to_string()]);

        f.handle.unbind(a);
        let stats = f.settle().await;
        assert_eq!(stats.devices.get("001"), Some(&1));
        assert!(f.link.unsubscribes().is_empty());

        f.handle.unbind(b);
        let stats = f.settle().await;
        assert!(stats.devices.is_empty());
        assert!(eventually(|| f.link.unsubscribes() == vec!["CarStatus_001".to_string()]).await);

        // Unbinding more often than binding changes nothing
        f.handle.unbind(b);
        f.handle.unbind(a);
        let stats = f.settle().await;
        assert_eq!(stats, MultiplexerStats::default());
        assert_eq!(f.link.unsubscribes().len(), 1);
    }

    #[tokio::test]
    async fn test_rebind_after_release_subscribes_again() {
        let f = fixture();
        let (a, _rx) = f.connect("001", 4).await;
        f.handle.unbind(a);
        f.settle().await;
        let (_b, _rx) = f.connect("001", 4).await;
        assert_eq!(f.link.subscribes().len(), 2);
        assert_eq!(f.link.unsubscribes().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_only_to_matching_device() {
        let f = fixture();
        let (_a, mut rx_a) = f.connect("001", 4).await;
        let (_b, mut rx_b) = f.connect("001", 4).await;
        let (_c, mut rx_c) = f.connect("002", 4).await;

        f.deliver("CarStatus_001", br#"{"vx":0.5,"vy":0.0,"omega":0.1,"wheelSpeeds":[1,2,3]}"#)
            .await;
        f.settle().await;

        let expected = json!({"vx": 0.5, "vy": 0.0, "omega": 0.1, "wheelSpeeds": [1, 2, 3]});
        assert_eq!(recv(&mut rx_a).await, expected);
        assert_eq!(recv(&mut rx_b).await, expected);
        assert!(matches!(rx_c.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_malformed_status_is_dropped_without_disconnecting() {
        let f = fixture();
        let (_a, mut rx_a) = f.connect("001", 4).await;
        let (_b, mut rx_b) = f.connect("002", 4).await;

        f.deliver("CarStatus_001", b"{not json").await;
        f.deliver("CarStatus_001", b"[1,2,3]").await;
        f.deliver("CarStatus_002", br#"{"vx":1.0}"#).await;
        f.deliver("CarStatus_001", br#"{"vx":2.0}"#).await;
        let stats = f.settle().await;

        assert_eq!(stats.connections, 2);
        assert_eq!(recv(&mut rx_a).await, json!({"vx": 2.0}));
        assert_eq!(recv(&mut rx_b).await, json!({"vx": 1.0}));
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
        assert!(f.link.unsubscribes().is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_is_unbound_during_fan_out() {
        let f = fixture();
        let (_a, rx_a) = f.connect("001", 4).await;
        let (_b, mut rx_b) = f.connect("001", 4).await;
        drop(rx_a);

        f.deliver("CarStatus_001", br#"{"vx":0.1}"#).await;
        let stats = f.settle().await;

        assert_eq!(recv(&mut rx_b).await, json!({"vx": 0.1}));
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.devices.get("001"), Some(&1));
        assert!(f.link.unsubscribes().is_empty());
    }

    #[tokio::test]
    async fn test_last_closed_connection_releases_topic() {
        let f = fixture();
        let (_a, rx_a) = f.connect("001", 4).await;
        drop(rx_a);

        f.deliver("CarStatus_001", br#"{"vx":0.1}"#).await;
        let stats = f.settle().await;

        assert_eq!(stats, MultiplexerStats::default());
        assert!(eventually(|| f.link.unsubscribes() == vec!["CarStatus_001".to_string()]).await);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_skipped_not_blocking() {
        let f = fixture();
        let (_slow, mut rx_slow) = f.connect("001", 1).await;
        let (_fast, mut rx_fast) = f.connect("001", 8).await;

        f.deliver("CarStatus_001", br#"{"seq":1}"#).await;
        f.deliver("CarStatus_001", br#"{"seq":2}"#).await;
        let stats = f.settle().await;

        assert_eq!(stats.connections, 2);
        assert_eq!(recv(&mut rx_fast).await, json!({"seq": 1}));
        assert_eq!(recv(&mut rx_fast).await, json!({"seq": 2}));
        assert_eq!(recv(&mut rx_slow).await, json!({"seq": 1}));
        assert!(matches!(rx_slow.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_nothing_bound() {
        let f = fixture();
        f.link.set_connected(false);

        let (tx, _rx) = mpsc::channel(4);
        let id = f.handle.next_connection_id();
        let err = f.handle.bind(id, device("001"), tx).await.unwrap_err();
        assert!(matches!(err, MultiplexerError::Subscribe(_)));
        assert_eq!(f.settle().await, MultiplexerStats::default());

        f.link.set_connected(true);
        let (_a, _rx) = f.connect("001", 4).await;
        assert_eq!(f.settle().await.devices.get("001"), Some(&1));
    }

    #[tokio::test]
    async fn test_double_bind_rejected() {
        let f = fixture();
        let (a, _rx) = f.connect("001", 4).await;
        let (tx, _rx2) = mpsc::channel(4);
        let err = f.handle.bind(a, device("002"), tx).await.unwrap_err();
        assert_eq!(err, MultiplexerError::AlreadyBound(a));
        assert_eq!(f.link.subscribes(), vec!["CarStatus_001".to_string()]);
    }

    #[tokio::test]
    async fn test_unwatched_topic_is_ignored() {
        let f = fixture();
        let (_a, mut rx_a) = f.connect("001", 4).await;
        f.deliver("CarStatus_009", br#"{"vx":1.0}"#).await;
        f.deliver("CarControl_001", br#"{"command":"stop"}"#).await;
        f.settle().await;
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_binds_subscribe_once() {
        let f = fixture();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let handle = f.handle.clone();
            tasks.push(tokio::spawn(async move {
                let id = handle.next_connection_id();
                let (tx, rx) = mpsc::channel(4);
                handle.bind(id, device("007"), tx).await.unwrap();
                (id, rx)
            }));
        }
        let mut bound = Vec::new();
        for task in tasks {
            bound.push(task.await.unwrap());
        }
        assert_eq!(f.link.subscribes(), vec!["CarStatus_007".to_string()]);
        assert_eq!(f.settle().await.devices.get("007"), Some(&32));

        let mut tasks = Vec::new();
        for (id, _) in &bound {
            let handle = f.handle.clone();
            let id = *id;
            tasks.push(tokio::spawn(async move {
                handle.unbind(id);
                handle.unbind(id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(f.settle().await, MultiplexerStats::default());
        assert!(eventually(|| f.link.unsubscribes() == vec!["CarStatus_007".to_string()]).await);
    }

    #[tokio::test]
    async fn test_pending_subscribe_does_not_stall_other_devices() {
        let f = fixture();
        let (_a, mut rx_a) = f.connect("001", 4).await;

        f.link.hold_subscribes();
        let handle = f.handle.clone();
        let waiting = tokio::spawn(async move {
            let id = handle.next_connection_id();
            let (tx, rx) = mpsc::channel(4);
            handle.bind(id, device("002"), tx).await.map(|_| rx)
        });

        f.deliver("CarStatus_001", br#"{"vx":0.3}"#).await;
        assert_eq!(recv(&mut rx_a).await, json!({"vx": 0.3}));
        assert_eq!(f.settle().await.devices.get("002"), None);

        f.link.release_subscribes();
        let mut rx_b = waiting.await.unwrap().unwrap();
        f.deliver("CarStatus_002", br#"{"vx":0.4}"#).await;
        assert_eq!(recv(&mut rx_b).await, json!({"vx": 0.4}));
    }

    #[tokio::test]
    async fn test_abandoned_bind_is_rolled_back() {
        let f = fixture();
        f.link.hold_subscribes();

        let (tx, _rx) = mpsc::channel(4);
        let id = f.handle.next_connection_id();
        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            f.handle.bind(id, device("003"), tx),
        )
        .await;
        assert!(attempt.is_err());

        f.link.release_subscribes();
        assert!(eventually(|| f.link.unsubscribes() == vec!["CarStatus_003".to_string()]).await);
        assert_eq!(f.settle().await, MultiplexerStats::default());
    }

    #[tokio::test]
    async fn test_binds_queue_behind_pending_subscribe() {
        let f = fixture();
        f.link.hold_subscribes();

        let mut waiting = Vec::new();
        for _ in 0..3 {
            let handle = f.handle.clone();
            waiting.push(tokio::spawn(async move {
                let id = handle.next_connection_id();
                let (tx, rx) = mpsc::channel(4);
                handle.bind(id, device("004"), tx).await.map(|_| rx)
            }));
        }
        // Let the binds reach the task before opening the gate
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.link.release_subscribes();

        for task in waiting {
            task.await.unwrap().unwrap();
        }
        assert_eq!(f.link.subscribes(), vec!["CarStatus_004".to_string()]);
        assert_eq!(f.settle().await.devices.get("004"), Some(&3));
    }
}
