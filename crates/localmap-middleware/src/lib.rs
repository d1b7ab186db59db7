//! `localmap-middleware` – message plumbing.
//!
//! Routes sensor readings in and local maps out without caring about their
//! geometry.
//!
//! # Modules
//!
//! - [`bus`] – topic-keyed publish/subscribe [`SensorBus`] built on Tokio
//!   broadcast channels; one topic per sensor channel.
//! - [`sink`] – the [`MapSink`] contract and the broadcast [`Publisher`]
//!   used for local maps and visualisation scenes.
//! - [`ws_bridge`] – [`WsBridge`]: WebSocket endpoint that feeds sensor and
//!   transform JSON in and streams maps and scenes out.

pub mod bus;
pub mod sink;
pub mod ws_bridge;

pub use bus::{SensorBus, TopicReceiver};
pub use sink::{MapPublisher, MapSink, Publisher, ScenePublisher};
pub use ws_bridge::WsBridge;
