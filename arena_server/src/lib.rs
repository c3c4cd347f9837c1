//! `arena_server`
//!
//! Relay server:
//! - Stores the last reported pose per connection and block health
//! - Applies block hits serially, 25 damage each, floored at zero
//! - Broadcasts a merged snapshot to every connection at a fixed rate
//! - Answers LAN discovery on `GET /info`
//!
//! No physics and no validation: clients own their own movement.

pub mod relay;
pub mod server;

pub use relay::RelayState;
pub use server::{bind_and_run, bind_ephemeral, run};
