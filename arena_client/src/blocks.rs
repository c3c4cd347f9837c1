//! Destructible block synchronization.
//!
//! Block health belongs to the relay. The client mirrors the latest list,
//! owns one static physics body per live block, and keeps transient label
//! state for blocks it has hit recently.

use std::collections::BTreeMap;

use arena_shared::{
    math::{Aabb, Vec3},
    net::Block,
    physics::{BodyHandle, PhysicsService},
};
use tracing::{debug, info, warn};

/// Edge length of every block.
pub const BLOCK_SIZE: f32 = 1.0;
/// How long a health label stays up after the last local hit.
pub const LABEL_SECONDS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEvent {
    Added(String),
    Destroyed(String),
    /// Absent from the latest list; body and label gone.
    Removed(String),
}

#[derive(Debug, Clone)]
pub struct TrackedBlock {
    pub block: Block,
    pub body: Option<BodyHandle>,
    pub destroyed: bool,
    /// Sim time of the last local hit.
    pub last_hit: Option<f64>,
}

impl TrackedBlock {
    fn new(block: Block) -> Self {
        let destroyed = block.is_destroyed();
        Self {
            block,
            body: None,
            destroyed,
            last_hit: None,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_center_size(
            self.block.position(),
            Vec3::new(BLOCK_SIZE, BLOCK_SIZE, BLOCK_SIZE),
        )
    }

    pub fn label_visible(&self, now: f64) -> bool {
        !self.destroyed && self.last_hit.is_some_and(|t| now - t < LABEL_SECONDS)
    }
}

/// Nearest block along a ray.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHit {
    pub block_id: String,
    pub toi: f32,
    pub point: Vec3,
}

#[derive(Debug, Default)]
pub struct BlockSync {
    blocks: BTreeMap<String, TrackedBlock>,
}

impl BlockSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles with an authoritative block list (welcome or snapshot).
    pub fn apply(&mut self, blocks: &[Block], physics: &mut dyn PhysicsService) -> Vec<BlockEvent> {
        let mut events = Vec::new();

        let stale: Vec<String> = self
            .blocks
            .keys()
            .filter(|id| !blocks.iter().any(|b| &b.id == *id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(tracked) = self.blocks.remove(&id) {
                release_body(physics, &id, tracked.body);
                debug!(block = %id, "Block removed");
                events.push(BlockEvent::Removed(id));
            }
        }

        for block in blocks {
            match self.blocks.get_mut(&block.id) {
                None => {
                    let tracked = TrackedBlock::new(block.clone());
                    events.push(BlockEvent::Added(block.id.clone()));
                    self.blocks.insert(block.id.clone(), tracked);
                }
                Some(tracked) => {
                    tracked.block.health = block.health;
                    if !tracked.destroyed && block.is_destroyed() {
                        tracked.destroyed = true;
                        tracked.last_hit = None;
                        release_body(physics, &block.id, tracked.body.take());
                        info!(block = %block.id, "Block destroyed");
                        events.push(BlockEvent::Destroyed(block.id.clone()));
                    }
                }
            }
        }

        events
    }

    /// Drops every tracked block and its body. A fresh welcome starts over
    /// from its own list, since a restarted relay may revive blocks.
    pub fn reset(&mut self, physics: &mut dyn PhysicsService) {
        for (id, tracked) in std::mem::take(&mut self.blocks) {
            release_body(physics, &id, tracked.body);
        }
    }

    /// Creates missing bodies for live blocks once physics is ready.
    ///
    /// Returns how many bodies were created.
    pub fn ensure_bodies(&mut self, physics: &mut dyn PhysicsService) -> usize {
        if !physics.is_ready() {
            return 0;
        }
        let mut created = 0;
        for (id, tracked) in self.blocks.iter_mut() {
            if tracked.destroyed || tracked.body.is_some() {
                continue;
            }
            let size = Vec3::new(BLOCK_SIZE, BLOCK_SIZE, BLOCK_SIZE);
            match physics.create_static_cube(tracked.block.position(), size) {
                Ok(body) => {
                    tracked.body = Some(body);
                    created += 1;
                }
                Err(e) => warn!(block = %id, error = %e, "Failed to create block body"),
            }
        }
        created
    }

    /// Nearest live block hit by a ray within `max_toi`.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, max_toi: f32) -> Option<BlockHit> {
        self.blocks
            .values()
            .filter(|t| !t.destroyed)
            .filter_map(|t| {
                t.bounds()
                    .ray_intersect(origin, dir, max_toi)
                    .map(|(toi, _)| (t, toi))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(t, toi)| BlockHit {
                block_id: t.block.id.clone(),
                toi,
                point: origin + dir * toi,
            })
    }

    /// Starts the label timer. Displayed health waits for the relay.
    pub fn mark_hit(&mut self, id: &str, now: f64) {
        if let Some(tracked) = self.blocks.get_mut(id) {
            if !tracked.destroyed {
                tracked.last_hit = Some(now);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&TrackedBlock> {
        self.blocks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn release_body(physics: &mut dyn PhysicsService, id: &str, body: Option<BodyHandle>) {
    if let Some(body) = body {
        if let Err(e) = physics.remove_rigid_body(body) {
            warn!(block = %id, error = %e, "Failed to remove block body");
        }
    }
}
