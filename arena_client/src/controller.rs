//! Character controller.
//!
//! Physics-driven capsule locomotion for the local player. Every fixed tick
//! the controller re-classifies the body as grounded or airborne from five
//! short downward ray casts, then steers the body with capped impulses so
//! collision push-back from the physics world is preserved.

use arena_shared::{
    math::Vec3,
    physics::{BodyHandle, CapsuleDesc, PhysicsError, PhysicsService},
};

use crate::input::{InputState, Keys};

/// Tuning for the capsule controller.
#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub half_height: f32,
    pub radius: f32,
    pub linear_damping: f32,
    pub walk_speed: f32,
    pub sprint_speed: f32,
    pub max_speed: f32,
    pub ground_accel: f32,
    pub air_accel: f32,
    /// Upward velocity change of one jump.
    pub jump_impulse: f32,
    pub jump_cooldown: f32,
    /// Radians.
    pub max_slope_angle: f32,
    /// Minimum vertical component of a walkable surface normal.
    pub min_ground_normal_y: f32,
    pub ground_friction: f32,
    /// Lateral probe offset as a fraction of the radius.
    pub probe_spread: f32,
    /// Probes start this far above the bottom of the capsule.
    pub probe_lift: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            half_height: 0.5,
            radius: 0.35,
            linear_damping: 0.1,
            walk_speed: 6.0,
            sprint_speed: 9.0,
            max_speed: 9.0,
            ground_accel: 40.0,
            air_accel: 8.0,
            jump_impulse: 4.5,
            jump_cooldown: 0.1,
            max_slope_angle: std::f32::consts::FRAC_PI_3,
            min_ground_normal_y: 0.5,
            ground_friction: 0.85,
            probe_spread: 0.7,
            probe_lift: 0.1,
        }
    }
}

impl ControllerConfig {
    pub fn capsule(&self) -> CapsuleDesc {
        CapsuleDesc {
            half_height: self.half_height,
            radius: self.radius,
            linear_damping: self.linear_damping,
        }
    }

    /// Hits farther than this are ignored entirely.
    pub fn ground_check_distance(&self) -> f32 {
        self.radius + 0.1
    }

    pub fn probe_length(&self) -> f32 {
        self.ground_check_distance() + 0.2
    }

    /// Hits must be closer than this to count as standing.
    pub fn grounded_threshold(&self) -> f32 {
        self.ground_check_distance() * 0.7
    }
}

/// Result of the latest ground classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundState {
    pub on_ground: bool,
    pub normal: Vec3,
    pub distance: Option<f32>,
    pub slope_angle: f32,
}

impl Default for GroundState {
    fn default() -> Self {
        Self {
            on_ground: false,
            normal: Vec3::UP,
            distance: None,
            slope_angle: 0.0,
        }
    }
}

/// Movement request for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveIntent {
    /// Forward axis in $[-1,1]$.
    pub forward: f32,
    /// Strafe axis in $[-1,1]$.
    pub right: f32,
    /// Heading the axes are relative to.
    pub yaw: f32,
    pub sprint: bool,
    pub jump: bool,
}

impl MoveIntent {
    pub fn from_input(input: &InputState, yaw: f32) -> Self {
        let (forward, right) = input.move_axes();
        Self {
            forward,
            right,
            yaw,
            sprint: input.pressed(Keys::SPRINT),
            jump: input.pressed(Keys::JUMP),
        }
    }

    /// Desired horizontal velocity before slope handling and clamping.
    pub fn desired_velocity(&self, cfg: &ControllerConfig) -> Vec3 {
        let (sin, cos) = self.yaw.sin_cos();
        let forward = Vec3::new(-sin, 0.0, -cos);
        let right = Vec3::new(cos, 0.0, -sin);
        let speed = if self.sprint {
            cfg.sprint_speed
        } else {
            cfg.walk_speed
        };
        let wish = forward * self.forward + right * self.right;
        if wish.len_sq() > 1e-6 {
            wish.normalize_or_zero() * speed
        } else {
            Vec3::ZERO
        }
    }
}

/// Projects a horizontal movement vector onto the plane with `normal`,
/// keeping its horizontal magnitude.
pub fn project_on_ground(desired: Vec3, normal: Vec3) -> Vec3 {
    let len = desired.horizontal().length();
    if len <= 0.001 {
        return desired;
    }
    let dir = desired.horizontal() * (1.0 / len);
    let along = dir - normal * dir.dot(normal);
    let flat = along.horizontal();
    let flat_len = flat.length();
    if flat_len <= 0.001 {
        return desired;
    }
    flat * (len / flat_len)
}

/// Grounded, slope-aware capsule controller.
#[derive(Debug)]
pub struct CharacterController {
    body: BodyHandle,
    config: ControllerConfig,
    ground: GroundState,
    was_jump_pressed: bool,
    jump_cooldown: f32,
}

impl CharacterController {
    /// Creates the capsule body. Fails with [`PhysicsError::NotReady`] when the
    /// world has not finished initializing; callers treat that as fatal.
    pub fn spawn(
        physics: &mut dyn PhysicsService,
        position: Vec3,
        config: ControllerConfig,
    ) -> Result<Self, PhysicsError> {
        if !physics.is_ready() {
            return Err(PhysicsError::NotReady);
        }
        let body = physics.create_capsule(position, config.capsule())?;
        Ok(Self {
            body,
            config,
            ground: GroundState::default(),
            was_jump_pressed: false,
            jump_cooldown: 0.0,
        })
    }

    pub fn body(&self) -> BodyHandle {
        self.body
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_on_ground(&self) -> bool {
        self.ground.on_ground
    }

    pub fn ground(&self) -> &GroundState {
        &self.ground
    }

    /// Advances the controller by one fixed tick.
    pub fn update(
        &mut self,
        physics: &mut dyn PhysicsService,
        dt: f32,
        intent: MoveIntent,
    ) -> Result<(), PhysicsError> {
        if self.jump_cooldown > 0.0 {
            self.jump_cooldown -= dt;
        }

        let linvel = physics.linvel(self.body)?;
        let position = physics.translation(self.body)?;
        let mass = physics.mass(self.body)?;

        self.ground = self.probe_ground(physics, position, linvel);
        let on_ground = self.ground.on_ground;

        // Ground friction opposes horizontal motion.
        let horizontal = linvel.horizontal();
        let h_speed = horizontal.length();
        if on_ground && h_speed > 0.01 {
            let force = h_speed * self.config.ground_friction;
            let dir = horizontal * (-1.0 / h_speed);
            physics.apply_impulse(self.body, dir * (force * mass * dt))?;
        }

        let mut desired = intent.desired_velocity(&self.config);
        if on_ground && self.ground.slope_angle > 0.01 {
            desired = project_on_ground(desired, self.ground.normal);
        }

        let max = self.config.max_speed;
        if desired.len_sq() > max * max {
            desired = desired.normalize_or_zero() * max;
        }

        let accel = if on_ground {
            self.config.ground_accel
        } else {
            self.config.air_accel
        };
        let inv_dt = 1.0 / dt.max(0.0001);
        let ax = ((desired.x - linvel.x) * inv_dt).clamp(-accel, accel);
        let az = ((desired.z - linvel.z) * inv_dt).clamp(-accel, accel);
        physics.apply_impulse(self.body, Vec3::new(ax, 0.0, az) * (mass * dt))?;

        let jump_edge = intent.jump && !self.was_jump_pressed;
        if jump_edge && on_ground && self.jump_cooldown <= 0.0 {
            physics.apply_impulse(self.body, Vec3::new(0.0, self.config.jump_impulse * mass, 0.0))?;
            self.jump_cooldown = self.config.jump_cooldown;
            // Rising now; the classification above no longer holds.
            self.ground.on_ground = false;
        }
        self.was_jump_pressed = intent.jump;

        Ok(())
    }

    fn probe_ground(
        &self,
        physics: &dyn PhysicsService,
        position: Vec3,
        linvel: Vec3,
    ) -> GroundState {
        let cfg = &self.config;
        let foot = position - Vec3::new(0.0, cfg.capsule().half_extent() - cfg.probe_lift, 0.0);
        let spread = cfg.radius * cfg.probe_spread;
        let origins = [
            foot,
            foot + Vec3::new(spread, 0.0, 0.0),
            foot - Vec3::new(spread, 0.0, 0.0),
            foot + Vec3::new(0.0, 0.0, spread),
            foot - Vec3::new(0.0, 0.0, spread),
        ];

        let nearest = origins
            .iter()
            .filter_map(|o| physics.cast_ray(*o, Vec3::DOWN, cfg.probe_length()))
            .min_by(|a, b| a.toi.total_cmp(&b.toi));

        let mut state = GroundState::default();
        let Some(hit) = nearest else {
            return state;
        };
        if hit.toi >= cfg.ground_check_distance() {
            return state;
        }

        let up_dot = hit.normal.y;
        state.distance = Some(hit.toi);
        state.normal = hit.normal;
        state.slope_angle = up_dot.clamp(-1.0, 1.0).acos();
        state.on_ground = state.slope_angle < cfg.max_slope_angle
            && hit.toi < cfg.grounded_threshold()
            && linvel.y <= 0.0
            && up_dot > cfg.min_ground_normal_y;
        state
    }
}
