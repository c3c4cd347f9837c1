//! Physics abstraction.
//!
//! The simulation consumes physics as a black-box service: rigid-body
//! creation, a deterministic step, impulses, and ray casts. [`SimplePhysics`]
//! is a small deterministic implementation (static boxes plus capsule bodies
//! resolved as boxes) used by the headless client and by tests.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::math::{Aabb, Vec3};

/// Opaque rigid-body handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhysicsError {
    /// The world was used before its readiness signal resolved.
    #[error("physics world is not ready")]
    NotReady,
    #[error("unknown rigid body {0:?}")]
    UnknownBody(BodyHandle),
}

/// Nearest hit of a ray cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Distance along the (unit) ray direction.
    pub toi: f32,
    pub normal: Vec3,
}

/// Physics parameters.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

/// Shape and damping of a dynamic capsule body.
#[derive(Debug, Clone, Copy)]
pub struct CapsuleDesc {
    /// Half the length of the cylindrical section.
    pub half_height: f32,
    pub radius: f32,
    pub linear_damping: f32,
}

impl CapsuleDesc {
    /// Distance from the body center to the bottom of the capsule.
    pub fn half_extent(&self) -> f32 {
        self.half_height + self.radius
    }

    /// Mass at unit density.
    pub fn mass(&self) -> f32 {
        let r = self.radius;
        let cylinder = std::f32::consts::PI * r * r * (2.0 * self.half_height);
        let sphere = 4.0 / 3.0 * std::f32::consts::PI * r * r * r;
        cylinder + sphere
    }
}

/// Rigid-body / ray-cast service consumed by the simulation.
///
/// Every creation and mutation call must happen after [`is_ready`] turns true;
/// earlier calls return [`PhysicsError::NotReady`].
///
/// [`is_ready`]: PhysicsService::is_ready
pub trait PhysicsService {
    fn is_ready(&self) -> bool;

    /// Advances the world by `dt` seconds.
    fn step(&mut self, dt: f32);

    /// Ground slab whose top face sits at y = 0.
    fn create_static_ground(&mut self, size: Vec3) -> Result<BodyHandle, PhysicsError>;
    fn create_static_cube(&mut self, position: Vec3, size: Vec3)
        -> Result<BodyHandle, PhysicsError>;
    fn create_static_wall(&mut self, position: Vec3, size: Vec3)
        -> Result<BodyHandle, PhysicsError>;
    fn create_capsule(
        &mut self,
        position: Vec3,
        desc: CapsuleDesc,
    ) -> Result<BodyHandle, PhysicsError>;
    fn remove_rigid_body(&mut self, body: BodyHandle) -> Result<(), PhysicsError>;

    /// Casts a ray against static geometry. `dir` must be unit length.
    fn cast_ray(&self, origin: Vec3, dir: Vec3, max_toi: f32) -> Option<RayHit>;

    fn translation(&self, body: BodyHandle) -> Result<Vec3, PhysicsError>;
    fn linvel(&self, body: BodyHandle) -> Result<Vec3, PhysicsError>;
    fn mass(&self, body: BodyHandle) -> Result<f32, PhysicsError>;
    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) -> Result<(), PhysicsError>;
}

#[derive(Debug, Clone)]
struct DynamicBody {
    position: Vec3,
    velocity: Vec3,
    desc: CapsuleDesc,
    mass: f32,
}

impl DynamicBody {
    fn bounds(&self) -> Aabb {
        let r = self.desc.radius;
        let h = self.desc.half_extent();
        Aabb {
            min: self.position - Vec3::new(r, h, r),
            max: self.position + Vec3::new(r, h, r),
        }
    }
}

/// Deterministic reference world.
#[derive(Debug, Default)]
pub struct SimplePhysics {
    config: PhysicsConfig,
    ready: bool,
    next_handle: u32,
    statics: BTreeMap<BodyHandle, Aabb>,
    dynamics: BTreeMap<BodyHandle, DynamicBody>,
}

impl SimplePhysics {
    /// Creates an uninitialized world; call [`SimplePhysics::init`] before use.
    pub fn new(config: PhysicsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Creates a world that is ready immediately.
    pub fn ready(config: PhysicsConfig) -> Self {
        let mut world = Self::new(config);
        world.init();
        world
    }

    /// Resolves the one-time readiness gate.
    pub fn init(&mut self) {
        if !self.ready {
            debug!(gravity = ?self.config.gravity, "Physics world ready");
        }
        self.ready = true;
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    pub fn contains(&self, body: BodyHandle) -> bool {
        self.statics.contains_key(&body) || self.dynamics.contains_key(&body)
    }

    fn alloc(&mut self) -> Result<BodyHandle, PhysicsError> {
        if !self.ready {
            return Err(PhysicsError::NotReady);
        }
        let h = BodyHandle(self.next_handle);
        self.next_handle += 1;
        Ok(h)
    }

    fn add_static(&mut self, bounds: Aabb) -> Result<BodyHandle, PhysicsError> {
        let h = self.alloc()?;
        self.statics.insert(h, bounds);
        Ok(h)
    }

    fn body(&self, body: BodyHandle) -> Result<&DynamicBody, PhysicsError> {
        if !self.ready {
            return Err(PhysicsError::NotReady);
        }
        self.dynamics
            .get(&body)
            .ok_or(PhysicsError::UnknownBody(body))
    }

    fn resolve_contacts(statics: &BTreeMap<BodyHandle, Aabb>, body: &mut DynamicBody) {
        for _ in 0..4 {
            let mut pushed = false;
            for s in statics.values() {
                let b = body.bounds();
                if !b.overlaps(s) {
                    continue;
                }

                // Push out along the axis of least penetration.
                let mut best_axis = 0;
                let mut best_push = f32::INFINITY;
                for axis in 0..3 {
                    let down = s.max.axis(axis) - b.min.axis(axis);
                    let up = b.max.axis(axis) - s.min.axis(axis);
                    let push = if down < up { down } else { -up };
                    if push.abs() < best_push.abs() {
                        best_push = push;
                        best_axis = axis;
                    }
                }

                match best_axis {
                    0 => {
                        body.position.x += best_push;
                        if body.velocity.x * best_push < 0.0 {
                            body.velocity.x = 0.0;
                        }
                    }
                    1 => {
                        body.position.y += best_push;
                        if body.velocity.y * best_push < 0.0 {
                            body.velocity.y = 0.0;
                        }
                    }
                    _ => {
                        body.position.z += best_push;
                        if body.velocity.z * best_push < 0.0 {
                            body.velocity.z = 0.0;
                        }
                    }
                }
                pushed = true;
            }
            if !pushed {
                break;
            }
        }
    }
}

impl PhysicsService for SimplePhysics {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn step(&mut self, dt: f32) {
        if !self.ready || dt <= 0.0 {
            return;
        }
        let gravity = self.config.gravity;
        for body in self.dynamics.values_mut() {
            body.velocity += gravity * dt;
            body.velocity = body.velocity * (1.0 / (1.0 + dt * body.desc.linear_damping));
            body.position += body.velocity * dt;
            Self::resolve_contacts(&self.statics, body);
        }
    }

    fn create_static_ground(&mut self, size: Vec3) -> Result<BodyHandle, PhysicsError> {
        let center = Vec3::new(0.0, -size.y * 0.5, 0.0);
        self.add_static(Aabb::from_center_size(center, size))
    }

    fn create_static_cube(
        &mut self,
        position: Vec3,
        size: Vec3,
    ) -> Result<BodyHandle, PhysicsError> {
        self.add_static(Aabb::from_center_size(position, size))
    }

    fn create_static_wall(
        &mut self,
        position: Vec3,
        size: Vec3,
    ) -> Result<BodyHandle, PhysicsError> {
        self.add_static(Aabb::from_center_size(position, size))
    }

    fn create_capsule(
        &mut self,
        position: Vec3,
        desc: CapsuleDesc,
    ) -> Result<BodyHandle, PhysicsError> {
        let h = self.alloc()?;
        self.dynamics.insert(
            h,
            DynamicBody {
                position,
                velocity: Vec3::ZERO,
                desc,
                mass: desc.mass(),
            },
        );
        Ok(h)
    }

    fn remove_rigid_body(&mut self, body: BodyHandle) -> Result<(), PhysicsError> {
        if !self.ready {
            return Err(PhysicsError::NotReady);
        }
        let removed = self.statics.remove(&body).is_some() || self.dynamics.remove(&body).is_some();
        if removed {
            Ok(())
        } else {
            Err(PhysicsError::UnknownBody(body))
        }
    }

    fn cast_ray(&self, origin: Vec3, dir: Vec3, max_toi: f32) -> Option<RayHit> {
        if !self.ready {
            return None;
        }
        self.statics
            .values()
            .filter_map(|s| s.ray_intersect(origin, dir, max_toi))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(toi, normal)| RayHit { toi, normal })
    }

    fn translation(&self, body: BodyHandle) -> Result<Vec3, PhysicsError> {
        self.body(body).map(|b| b.position)
    }

    fn linvel(&self, body: BodyHandle) -> Result<Vec3, PhysicsError> {
        self.body(body).map(|b| b.velocity)
    }

    fn mass(&self, body: BodyHandle) -> Result<f32, PhysicsError> {
        self.body(body).map(|b| b.mass)
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3) -> Result<(), PhysicsError> {
        if !self.ready {
            return Err(PhysicsError::NotReady);
        }
        let b = self
            .dynamics
            .get_mut(&body)
            .ok_or(PhysicsError::UnknownBody(body))?;
        b.velocity += impulse * (1.0 / b.mass);
        Ok(())
    }
}
