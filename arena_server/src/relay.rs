//! Relay state.
//!
//! The relay stores the last pose each connection reported and the health of
//! every block. It runs no physics and validates nothing beyond message shape.
//! All mutation goes through one owner (the relay task), one message at a time.

use std::collections::BTreeMap;

use arena_shared::{
    math::Vec3,
    net::{Block, ClientMsg, PlayerEntry, PlayerPose, ServerMsg, Snapshot, DEFAULT_USERNAME},
};
use rand::Rng;
use tracing::{debug, info};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 10;

/// Random base-36 connection id.
pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Six 1 m cubes in a row in front of the spawn point.
pub fn default_blocks() -> Vec<Block> {
    (0..6)
        .map(|i| {
            let x = -5.0 + i as f32 * 2.0;
            Block::new(format!("block-{i}"), Vec3::new(x, 0.5, -8.0))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Connection {
    username: String,
    pose: PlayerPose,
}

/// What a handled message changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Renamed,
    Moved,
    BlockHit { block_id: String, health: i32 },
    /// Hit on an id the relay does not know.
    Ignored,
    /// Message from a connection that already left.
    NoSuchPlayer,
}

#[derive(Debug, Clone)]
pub struct RelayState {
    players: BTreeMap<String, Connection>,
    blocks: Vec<Block>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(default_blocks())
    }
}

impl RelayState {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            players: BTreeMap::new(),
            blocks,
        }
    }

    /// Registers a connection under a fresh id and returns its welcome.
    pub fn join(&mut self) -> (String, ServerMsg) {
        let id = loop {
            let candidate = random_id();
            if !self.players.contains_key(&candidate) {
                break candidate;
            }
        };
        self.join_as(id.clone());
        let welcome = ServerMsg::Welcome {
            id: id.clone(),
            blocks: Some(self.blocks.clone()),
        };
        (id, welcome)
    }

    /// Registers a connection with a known id. Until it reports a state its
    /// pose is all zeros.
    pub fn join_as(&mut self, id: String) {
        info!(id = %id, "Player joined");
        self.players.insert(
            id,
            Connection {
                username: DEFAULT_USERNAME.to_string(),
                pose: PlayerPose::default(),
            },
        );
    }

    pub fn handle(&mut self, id: &str, msg: ClientMsg) -> Applied {
        if let ClientMsg::HitBlock { block_id } = msg {
            return self.hit_block(id, block_id);
        }

        let Some(conn) = self.players.get_mut(id) else {
            return Applied::NoSuchPlayer;
        };
        match msg {
            ClientMsg::Hello { username } => {
                info!(id = %id, username = %username, "Hello");
                conn.username = username;
                Applied::Renamed
            }
            ClientMsg::State(pose) => {
                conn.pose = pose;
                Applied::Moved
            }
            ClientMsg::HitBlock { .. } => Applied::Ignored,
        }
    }

    fn hit_block(&mut self, id: &str, block_id: String) -> Applied {
        if !self.players.contains_key(id) {
            return Applied::NoSuchPlayer;
        }
        match self.blocks.iter_mut().find(|b| b.id == block_id) {
            Some(block) => {
                let health = block.apply_hit();
                debug!(id = %id, block = %block_id, health, "Block hit");
                Applied::BlockHit { block_id, health }
            }
            None => {
                debug!(id = %id, block = %block_id, "Hit on unknown block ignored");
                Applied::Ignored
            }
        }
    }

    pub fn leave(&mut self, id: &str) -> bool {
        let removed = self.players.remove(id).is_some();
        if removed {
            info!(id = %id, "Player left");
        }
        removed
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            players: self
                .players
                .iter()
                .map(|(id, c)| {
                    (
                        id.clone(),
                        PlayerEntry {
                            pose: c.pose,
                            username: c.username.clone(),
                        },
                    )
                })
                .collect(),
            blocks: self.blocks.clone(),
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_ten_base36_chars() {
        let id = random_id();
        assert_eq!(id.len(), 10);
        assert!(id.bytes().all(|c| ID_ALPHABET.contains(&c)));
    }

    #[test]
    fn welcome_carries_blocks_and_new_player_reports_zeros() {
        let mut relay = RelayState::default();
        let (id, welcome) = relay.join();
        match welcome {
            ServerMsg::Welcome { id: wid, blocks } => {
                assert_eq!(wid, id);
                assert_eq!(blocks.unwrap().len(), 6);
            }
            other => panic!("unexpected {other:?}"),
        }
        let snap = relay.snapshot();
        let entry = &snap.players[&id];
        assert_eq!(entry.pose, PlayerPose::default());
        assert_eq!(entry.username, DEFAULT_USERNAME);
    }

    #[test]
    fn four_hits_floor_block_at_zero() {
        let mut relay = RelayState::default();
        relay.join_as("p".into());
        let hit = || ClientMsg::HitBlock {
            block_id: "block-0".into(),
        };
        let healths: Vec<_> = (0..5)
            .map(|_| match relay.handle("p", hit()) {
                Applied::BlockHit { health, .. } => health,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(healths, vec![75, 50, 25, 0, 0]);
        assert!(relay.block("block-0").unwrap().is_destroyed());
    }

    #[test]
    fn unknown_block_and_departed_player_are_ignored() {
        let mut relay = RelayState::default();
        relay.join_as("p".into());
        let before = relay.snapshot().blocks;
        let res = relay.handle(
            "p",
            ClientMsg::HitBlock {
                block_id: "nope".into(),
            },
        );
        assert_eq!(res, Applied::Ignored);
        assert_eq!(relay.snapshot().blocks, before);

        assert!(relay.leave("p"));
        let res = relay.handle("p", ClientMsg::State(PlayerPose::default()));
        assert_eq!(res, Applied::NoSuchPlayer);
        assert!(!relay.leave("p"));
    }

    #[test]
    fn state_and_hello_update_snapshot() {
        let mut relay = RelayState::default();
        relay.join_as("p".into());
        relay.handle(
            "p",
            ClientMsg::Hello {
                username: "Ana".into(),
            },
        );
        relay.handle(
            "p",
            ClientMsg::State(PlayerPose::new(Vec3::new(1.0, 2.0, 3.0), 0.5)),
        );
        let snap = relay.snapshot();
        assert_eq!(snap.players["p"].username, "Ana");
        assert_eq!(snap.players["p"].pose.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(relay.player_count(), 1);
    }
}
