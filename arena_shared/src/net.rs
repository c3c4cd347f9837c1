//! Wire protocol.
//!
//! Goals:
//! - One closed, tagged message type per direction (`t` carries the tag).
//! - Decoding never fails hard: unknown tags and malformed payloads are
//!   reported as values so a connection can skip them and keep going.
//! - Keep serialization explicit; every message is one JSON text frame.

use std::collections::BTreeMap;

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::math::Vec3;

/// Damage applied to a block per accepted hit.
pub const BLOCK_HIT_DAMAGE: i32 = 25;
/// Health of a fresh block.
pub const BLOCK_MAX_HEALTH: i32 = 100;
/// Username used when a client does not send one.
pub const DEFAULT_USERNAME: &str = "Player";

/// Position and heading of one player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PlayerPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
}

impl PlayerPose {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            yaw,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

/// One player entry inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    #[serde(flatten)]
    pub pose: PlayerPose,
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

/// A destructible block. Health is server-authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub health: i32,
}

impl Block {
    pub fn new(id: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: id.into(),
            x: position.x,
            y: position.y,
            z: position.z,
            health: BLOCK_MAX_HEALTH,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn is_destroyed(&self) -> bool {
        self.health <= 0
    }

    /// Applies one hit, flooring health at zero. Returns the new health.
    pub fn apply_hit(&mut self) -> i32 {
        self.health = (self.health - BLOCK_HIT_DAMAGE).max(0);
        self.health
    }
}

/// Complete, authoritative world state at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub players: BTreeMap<String, PlayerEntry>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Client -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum ClientMsg {
    Hello {
        #[serde(default = "default_username")]
        username: String,
    },
    State(PlayerPose),
    HitBlock {
        #[serde(rename = "blockId")]
        block_id: String,
    },
}

/// Server -> client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Sent once per connection right after accept.
    Welcome {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blocks: Option<Vec<Block>>,
    },
    /// Broadcast to every connection at the snapshot rate.
    Snapshot(Snapshot),
}

/// Response of the LAN discovery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub name: String,
    pub port: u16,
    pub players: usize,
    pub status: String,
}

/// A message type with a closed set of tags.
pub trait WireMessage: Serialize + DeserializeOwned {
    const TAGS: &'static [&'static str];
}

impl WireMessage for ClientMsg {
    const TAGS: &'static [&'static str] = &["hello", "state", "hitBlock"];
}

impl WireMessage for ServerMsg {
    const TAGS: &'static [&'static str] = &["welcome", "snapshot"];
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Msg(T),
    /// Well-formed JSON carrying a tag this side does not know.
    Unknown { tag: String },
    /// Not JSON, no tag, or a known tag with the wrong shape.
    Malformed { reason: String },
}

/// Decodes a text frame into a message, never failing.
pub fn decode<T: WireMessage>(text: &str) -> Decoded<T> {
    match serde_json::from_str::<T>(text) {
        Ok(msg) => Decoded::Msg(msg),
        Err(err) => {
            let tag = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("t").and_then(|t| t.as_str()).map(str::to_owned));
            match tag {
                Some(tag) if !T::TAGS.contains(&tag.as_str()) => Decoded::Unknown { tag },
                _ => Decoded::Malformed {
                    reason: err.to_string(),
                },
            }
        }
    }
}

/// Encodes a message as one JSON text frame.
pub fn encode<T: WireMessage>(msg: &T) -> anyhow::Result<String> {
    serde_json::to_string(msg).context("serialize msg")
}
