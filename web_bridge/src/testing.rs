//! In-memory broker link for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::broker::BrokerLink;
use crate::error::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    Publish(String, Vec<u8>),
    Subscribe(String),
    Unsubscribe(String),
}

/// Poll `condition` until it holds, giving up after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Records every successful call; fails fast like the real link when
/// switched to disconnected.
///
/// Subscribes can be held open to imitate a broker that never acknowledges.
pub struct RecordingLink {
    connected: AtomicBool,
    calls: Mutex<Vec<LinkCall>>,
    subscribe_gate: watch::Sender<bool>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            subscribe_gate: watch::Sender::new(true),
        }
    }

    /// Subscribes issued from now on wait until [`Self::release_subscribes`].
    pub fn hold_subscribes(&self) {
        self.subscribe_gate.send_replace(false);
    }

    pub fn release_subscribes(&self) {
        self.subscribe_gate.send_replace(true);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LinkCall::Subscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LinkCall::Unsubscribe(topic) => Some(topic),
                _ => None,
            })
            .collect()
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LinkCall::Publish(topic, payload) => {
                    Some((topic, serde_json::from_slice(&payload).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: LinkCall) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl BrokerLink for RecordingLink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.record(LinkCall::Publish(topic.to_string(), payload))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        let mut gate = self.subscribe_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.record(LinkCall::Subscribe(topic.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        self.record(LinkCall::Unsubscribe(topic.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
