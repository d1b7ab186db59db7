//! WebSocket bridge.
//!
//! [`WsBridge`]:
//!
//! 1. **Ingests** rosbridge-style JSON frames from connected clients:
//!    sensor readings are forwarded to the [`SensorBus`] topic they name,
//!    transforms are inserted into the shared [`TfBuffer`].
//!
//! 2. **Streams** every published local map and visualisation scene back to
//!    each connected client as a JSON text frame.  A connected client holds a
//!    map receiver, so it counts as a map subscriber.
//!
//! # Inbound frames
//!
//! ```json
//! {"op":"publish","topic":"scan","msg":{"header":{"frame_id":"laser","stamp":12.5},"payload":{"type":"LaserScan","data":{...}}}}
//! {"op":"tf","parent":"odom","child":"base_link","stamp":12.5,"pose":{"translation":{...},"rotation":{...}}}
//! {"op":"tf","parent":"base_link","child":"laser","static":true,"pose":{...}}
//! ```
//!
//! # Outbound frames
//!
//! `{"op":"map", ...LocalMapMessage}` and `{"op":"scene", ...SceneSnapshot}`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use localmap_perception::{Pose3D, TfBuffer};
use localmap_types::{LocalMapError, LocalMapMessage, SceneSnapshot, SensorMessage, Stamp};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::SensorBus;
use crate::sink::{MapPublisher, ScenePublisher};

/// A frame sent by a client.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum InboundFrame {
    Publish {
        topic: String,
        msg: SensorMessage,
    },
    Tf {
        parent: String,
        child: String,
        #[serde(default)]
        stamp: Option<Stamp>,
        pose: Pose3D,
        #[serde(default, rename = "static")]
        is_static: bool,
    },
}

/// A frame sent to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Map(&'a LocalMapMessage),
    Scene(&'a SceneSnapshot),
}

/// Bridge between WebSocket clients and the in-process bus, transform
/// buffer and publishers.
#[derive(Clone)]
pub struct WsBridge {
    bus: SensorBus,
    tf: Arc<TfBuffer>,
    maps: MapPublisher,
    scenes: ScenePublisher,
}

impl WsBridge {
    pub fn new(bus: SensorBus, tf: Arc<TfBuffer>, maps: MapPublisher, scenes: ScenePublisher) -> Self {
        Self {
            bus,
            tf,
            maps,
            scenes,
        }
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Start a WebSocket server on `addr`.
    ///
    /// Runs until it encounters a fatal bind error.
    ///
    /// # Errors
    ///
    /// Returns [`LocalMapError::Channel`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), LocalMapError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LocalMapError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "websocket bridge listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), LocalMapError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| LocalMapError::Channel(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut maps_rx = self.maps.subscribe();
        let mut scenes_rx = self.scenes.subscribe();

        loop {
            let outbound = tokio::select! {
                result = maps_rx.recv() => match result {
                    Ok(map) => Some(encode(&OutboundFrame::Map(&map))?),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(peer = %peer, lagged_by = n, "ws client lagged on maps");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                result = scenes_rx.recv() => match result {
                    Ok(scene) => Some(encode(&OutboundFrame::Scene(&scene))?),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(peer = %peer, lagged_by = n, "ws client lagged on scenes");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.handle_incoming_ws_message(text.as_str()) {
                            warn!(peer = %peer, error = %e, "rejected ws frame");
                        }
                        None
                    }
                    _ => None,
                },
            };

            if let Some(json) = outbound {
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Apply one inbound text frame.
    ///
    /// Sensor readings go to the bus (dropped when the topic has no
    /// subscriber); transforms go to the TF buffer.  Transforms without a
    /// stamp are recorded at the current wall-clock time.
    fn handle_incoming_ws_message(&self, text: &str) -> Result<(), LocalMapError> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(|e| LocalMapError::Serialization(e.to_string()))?;

        match frame {
            InboundFrame::Publish { topic, msg } => {
                let delivered = self.bus.publish(&topic, msg);
                if delivered == 0 {
                    debug!(topic = %topic, "no subscriber for inbound sensor frame");
                }
            }
            InboundFrame::Tf {
                parent,
                child,
                stamp,
                pose,
                is_static,
            } => {
                let pose = Pose3D::new(pose.translation, pose.rotation.normalized());
                if is_static {
                    self.tf.set_static_transform(&parent, &child, pose);
                } else {
                    let stamp = stamp.unwrap_or_else(Stamp::now);
                    self.tf.set_transform(&parent, &child, stamp, pose);
                }
            }
        }
        Ok(())
    }
}

fn encode(frame: &OutboundFrame<'_>) -> Result<String, LocalMapError> {
    serde_json::to_string(frame).map_err(|e| LocalMapError::Serialization(e.to_string()))
}
