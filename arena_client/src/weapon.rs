//! Hitscan weapon.
//!
//! Fire is resolved locally against live block volumes. A hit is reported to
//! the relay right away; displayed health only changes when a later snapshot
//! says so.

use arena_shared::math::Vec3;
use tracing::debug;

use crate::{blocks::BlockSync, client::NetLink};

pub const MAX_RANGE: f32 = 100.0;
pub const TRACER_SECONDS: f64 = 0.1;

/// Result of one trigger pull.
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    pub origin: Vec3,
    pub direction: Vec3,
    pub hit_point: Option<Vec3>,
    pub block_id: Option<String>,
}

impl Shot {
    /// Where the tracer ends.
    pub fn end(&self) -> Vec3 {
        self.hit_point
            .unwrap_or(self.origin + self.direction * MAX_RANGE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tracer {
    pub from: Vec3,
    pub to: Vec3,
    pub expires_at: f64,
}

#[derive(Debug, Default)]
pub struct Hitscan {
    tracers: Vec<Tracer>,
}

impl Hitscan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(
        &mut self,
        origin: Vec3,
        direction: Vec3,
        blocks: &mut BlockSync,
        net: &dyn NetLink,
        now: f64,
    ) -> Shot {
        let direction = direction.normalize_or_zero();
        let hit = blocks.raycast(origin, direction, MAX_RANGE);

        let shot = match hit {
            Some(hit) => {
                net.send_hit_block(&hit.block_id);
                blocks.mark_hit(&hit.block_id, now);
                debug!(block = %hit.block_id, distance = hit.toi, "Block hit");
                Shot {
                    origin,
                    direction,
                    hit_point: Some(hit.point),
                    block_id: Some(hit.block_id),
                }
            }
            None => Shot {
                origin,
                direction,
                hit_point: None,
                block_id: None,
            },
        };

        self.tracers.push(Tracer {
            from: shot.origin,
            to: shot.end(),
            expires_at: now + TRACER_SECONDS,
        });
        shot
    }

    /// Drops tracers whose lifetime has passed.
    pub fn expire(&mut self, now: f64) {
        self.tracers.retain(|t| t.expires_at > now);
    }

    pub fn tracers(&self) -> &[Tracer] {
        &self.tracers
    }
}
