//! `arena_client`
//!
//! Client-side systems:
//! - Input state and local player look
//! - Physics-driven character controller
//! - WebSocket connection to the relay (actor behind channels)
//! - Interpolation for remote players
//! - Destructible block synchronization and hitscan fire
//! - Fixed-timestep loop wiring it all to a render backend

pub mod blocks;
pub mod client;
pub mod controller;
pub mod game_loop;
pub mod input;
pub mod interp;
pub mod player;
pub mod weapon;

pub use client::{NetClient, NetLink};
pub use game_loop::GameLoop;
