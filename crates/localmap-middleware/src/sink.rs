//! Output sinks.
//!
//! The map builder hands its result to a [`MapSink`].  [`Publisher`] is the
//! broadcast implementation: every subscriber (e.g. a WebSocket client)
//! gets every map, and publishing with nobody listening is a no-op.

use localmap_types::{LocalMapError, LocalMapMessage, SceneSnapshot};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 16;

/// Destination of the aggregated local map.
pub trait MapSink: Send + Sync {
    /// Number of consumers currently listening.  The builder skips
    /// serialisation entirely when this is zero.
    fn subscriber_count(&self) -> usize;

    /// Hand `map` to every consumer; returns how many received it.
    fn publish(&self, map: LocalMapMessage) -> Result<usize, LocalMapError>;
}

/// Broadcast publisher of `T`.  Clones share the same channel.
#[derive(Debug, Clone)]
pub struct Publisher<T> {
    sender: broadcast::Sender<T>,
}

/// Publisher of local maps.
pub type MapPublisher = Publisher<LocalMapMessage>;

/// Publisher of visualisation scenes.
pub type ScenePublisher = Publisher<SceneSnapshot>;

impl<T: Clone> Publisher<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Broadcast `msg`; `0` when nobody listens.
    pub fn send(&self, msg: T) -> usize {
        self.sender.send(msg).unwrap_or(0)
    }
}

impl<T: Clone> Default for Publisher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MapSink for Publisher<LocalMapMessage> {
    fn subscriber_count(&self) -> usize {
        self.receiver_count()
    }

    fn publish(&self, map: LocalMapMessage) -> Result<usize, LocalMapError> {
        Ok(self.send(map))
    }
}
