//! Local player: first-person look plus the capsule controller.

use arena_shared::{
    math::Vec3,
    net::PlayerPose,
    physics::{PhysicsError, PhysicsService},
};

use crate::{
    controller::{CharacterController, ControllerConfig, MoveIntent},
    input::InputState,
};

/// Radians per unit of look delta.
pub const LOOK_SENSITIVITY: f32 = 0.0025;
/// Camera height above the body center.
pub const HEAD_HEIGHT: f32 = 0.9;
pub const SPAWN_POINT: Vec3 = Vec3::new(0.0, 2.0, 0.0);

const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

#[derive(Debug)]
pub struct LocalPlayer {
    pub yaw: f32,
    pub pitch: f32,
    controller: CharacterController,
}

impl LocalPlayer {
    pub fn spawn(
        physics: &mut dyn PhysicsService,
        position: Vec3,
        config: ControllerConfig,
    ) -> Result<Self, PhysicsError> {
        Ok(Self {
            yaw: 0.0,
            pitch: 0.0,
            controller: CharacterController::spawn(physics, position, config)?,
        })
    }

    pub fn controller(&self) -> &CharacterController {
        &self.controller
    }

    /// Turns the view by a look delta. Moving right or down turns right or down.
    pub fn apply_look(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * LOOK_SENSITIVITY;
        self.pitch = (self.pitch - dy * LOOK_SENSITIVITY).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Unit view direction; yaw 0 and pitch 0 look down -Z.
    pub fn view_direction(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(-sy * cp, sp, -cy * cp)
    }

    pub fn update(
        &mut self,
        physics: &mut dyn PhysicsService,
        dt: f32,
        input: &InputState,
    ) -> Result<(), PhysicsError> {
        let intent = MoveIntent::from_input(input, self.yaw);
        self.controller.update(physics, dt, intent)
    }

    pub fn position(&self, physics: &dyn PhysicsService) -> Result<Vec3, PhysicsError> {
        physics.translation(self.controller.body())
    }

    pub fn eye_position(&self, physics: &dyn PhysicsService) -> Result<Vec3, PhysicsError> {
        Ok(self.position(physics)? + Vec3::new(0.0, HEAD_HEIGHT, 0.0))
    }

    /// The pose reported to the relay.
    pub fn pose(&self, physics: &dyn PhysicsService) -> Result<PlayerPose, PhysicsError> {
        Ok(PlayerPose::new(self.position(physics)?, self.yaw))
    }
}
