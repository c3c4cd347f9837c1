//! Input handling.
//!
//! Device capture (keyboard listeners, pointer lock, mouse motion) lives
//! outside this crate; collaborators write into an [`InputState`] and the loop
//! reads it once per tick and clears the per-frame parts once per render.

use bitflags::bitflags;

bitflags! {
    /// Held movement keys.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Keys: u8 {
        const FORWARD = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const JUMP = 1 << 4;
        const SPRINT = 1 << 5;
    }
}

/// User input state, continuously updated by device collaborators.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub keys: Keys,
    /// Look delta accumulated since the last render frame.
    pub look_dx: f32,
    pub look_dy: f32,
    /// Fire edge: set on press, cleared every render frame.
    pub fire: bool,
}

impl InputState {
    pub fn pressed(&self, key: Keys) -> bool {
        self.keys.contains(key)
    }

    pub fn set_key(&mut self, key: Keys, down: bool) {
        self.keys.set(key, down);
    }

    /// Maps a DOM-style key name to a movement key.
    pub fn key_for(name: &str) -> Option<Keys> {
        match name {
            "w" | "W" | "ArrowUp" => Some(Keys::FORWARD),
            "s" | "S" | "ArrowDown" => Some(Keys::BACKWARD),
            "a" | "A" | "ArrowLeft" => Some(Keys::LEFT),
            "d" | "D" | "ArrowRight" => Some(Keys::RIGHT),
            " " => Some(Keys::JUMP),
            "Shift" => Some(Keys::SPRINT),
            _ => None,
        }
    }

    pub fn add_look(&mut self, dx: f32, dy: f32) {
        self.look_dx += dx;
        self.look_dy += dy;
    }

    pub fn press_fire(&mut self) {
        self.fire = true;
    }

    /// Forward/right axes in $[-1,1]$.
    pub fn move_axes(&self) -> (f32, f32) {
        let axis = |pos: Keys, neg: Keys| {
            (self.pressed(pos) as i8 - self.pressed(neg) as i8) as f32
        };
        (
            axis(Keys::FORWARD, Keys::BACKWARD),
            axis(Keys::RIGHT, Keys::LEFT),
        )
    }

    /// Clears look deltas and the fire edge. Held keys persist.
    pub fn reset_per_frame(&mut self) {
        self.look_dx = 0.0;
        self.look_dy = 0.0;
        self.fire = false;
    }
}
