use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Peers closer than this (in minimap pixels) count as "near".
pub const PROXIMITY_THRESHOLD: f32 = 35.0;
/// Minimum seconds between two buff triggers.
pub const BUFF_COOLDOWN_SECS: u64 = 10;
/// How often the detector samples the minimap, in milliseconds.
pub const DETECTION_INTERVAL_MS: u64 = 250;
/// How often the proximity evaluator polls, in milliseconds.
pub const EVAL_INTERVAL_MS: u64 = 500;
/// Pause between consecutive key injections, in milliseconds.
pub const KEY_PRESS_DELAY_MS: u64 = 400;
/// Relay-side liveness timeout: silent peers are pruned after this.
pub const PEER_TIMEOUT_SECS: u64 = 10;
/// How often a disconnected detector retries its handshake.
pub const RECONNECT_INTERVAL_SECS: u64 = 3;
pub const CLIENT_VERSION: u32 = 1;

/// Wire protocol between detector clients and the relay.
///
/// Serialized with bincode, one packet per UDP datagram.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    PositionUpdate {
        pos: Position,
    },
    ConfigBroadcast {
        config: MinimapConfig,
    },
    Disconnect,

    Connected {
        peer_id: u32,
    },
    /// Full replace of the receiver's cached peer view. Always a complete
    /// state as of some point in relay history, never a partial delta.
    PositionSnapshot {
        positions: HashMap<u32, Position>,
    },
    ConfigUpdate {
        config: MinimapConfig,
    },
    Disconnected {
        reason: String,
    },
}

/// A character position on the minimap, relative to its top-left corner.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Rejects NaN/infinite coordinates from untrusted packets.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Returns true when `other` should trigger a buff: strictly closer than the
/// threshold but not exactly colocated. A zero distance is almost certainly
/// our own position echoed back by the relay, not a real neighbor.
pub fn within_proximity(me: &Position, other: &Position, threshold: f32) -> bool {
    let distance = me.distance_to(other);
    distance > 0.0 && distance < threshold
}

/// An absolute screen rectangle covering the game's minimap.
///
/// Produced by the external calibration flow; the relay treats it as an
/// opaque payload and never interprets the fields.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct MinimapConfig {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}
