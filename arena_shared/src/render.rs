//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! Define traits that a renderer implementation would satisfy.

use crate::math::{Quat, Vec3};

/// A remote avatar as it should be drawn this frame.
#[derive(Debug, Clone, Copy)]
pub struct AvatarView<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub position: Vec3,
    pub rotation: Quat,
}

/// A block as it should be drawn this frame.
#[derive(Debug, Clone, Copy)]
pub struct BlockView<'a> {
    pub id: &'a str,
    pub position: Vec3,
    pub health: i32,
    pub label_visible: bool,
}

/// A minimal rendering API.
pub trait RenderBackend {
    fn begin_frame(&mut self);
    fn set_camera(&mut self, position: Vec3, yaw: f32, pitch: f32);
    fn draw_avatar(&mut self, avatar: AvatarView<'_>);
    fn draw_block(&mut self, block: BlockView<'_>);
    fn draw_tracer(&mut self, from: Vec3, to: Vec3);
    fn end_frame(&mut self);
}

/// A no-op renderer useful for headless runs and tests.
#[derive(Default)]
pub struct NullRenderer {
    pub frames: u64,
}

impl RenderBackend for NullRenderer {
    fn begin_frame(&mut self) {}
    fn set_camera(&mut self, _position: Vec3, _yaw: f32, _pitch: f32) {}
    fn draw_avatar(&mut self, _avatar: AvatarView<'_>) {}
    fn draw_block(&mut self, _block: BlockView<'_>) {}
    fn draw_tracer(&mut self, _from: Vec3, _to: Vec3) {}
    fn end_frame(&mut self) {
        self.frames += 1;
    }
}
