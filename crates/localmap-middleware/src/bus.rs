//! Topic-keyed sensor bus.
//!
//! Uses one [`tokio::sync::broadcast`] channel per named topic (e.g. `"scan"`,
//! `"laser1"`, `"velodyne_points"`) so that every subscriber of a topic
//! receives every message without any single subscriber blocking the others,
//! and channels never observe each other's traffic.
//!
//! Topics are created lazily by the first publisher or subscriber.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use localmap_types::SensorMessage;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Shared sensor bus.  Clone it cheaply – all clones share the same
/// underlying topic channels.
#[derive(Clone, Debug)]
pub struct SensorBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<SensorMessage>>>>,
    capacity: usize,
}

impl SensorBus {
    /// Create a new bus; `capacity` applies to every topic independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish `msg` on `topic`.
    ///
    /// Returns the number of active receivers that were handed the message.
    /// `0` when nobody listens on the topic; that is a normal condition, the
    /// message is simply dropped.
    pub fn publish(&self, topic: &str, msg: SensorMessage) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        match topics.get(topic) {
            Some(sender) => sender.send(msg).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to `topic`, creating the channel if needed.
    pub fn subscribe(&self, topic: &str) -> TopicReceiver {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        TopicReceiver {
            topic: topic.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, |s| s.receiver_count())
    }

    /// Names of every topic created so far, sorted.
    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for SensorBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single topic.
///
/// Obtained via [`SensorBus::subscribe`].
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<SensorMessage>,
}

impl TopicReceiver {
    /// Wait for the next message on this topic.
    ///
    /// A subscriber that fell behind skips the dropped messages (logged) and
    /// keeps going.  Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<SensorMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, lagged_by = n, "sensor subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for a message, then skip to the newest one already queued.
    ///
    /// Sensor consumers only care about the latest reading: anything older
    /// that piled up while they were busy is discarded (logged at debug).
    pub async fn recv_latest(&mut self) -> Option<SensorMessage> {
        let mut msg = self.recv().await?;
        let mut skipped: u64 = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(newer) => {
                    msg = newer;
                    skipped += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => skipped += n,
                Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => break,
            }
        }
        if skipped > 0 {
            debug!(topic = %self.topic, skipped, "skipped stale sensor messages");
        }
        Some(msg)
    }

    /// The topic this receiver is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
