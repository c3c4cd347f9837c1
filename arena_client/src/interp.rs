//! Interpolation.
//!
//! The relay sends discrete snapshots at a low rate. The client keeps one
//! [`RemotePlayer`] per other connected player and eases its rendered pose
//! toward the latest snapshot target every fixed tick.

use std::collections::BTreeMap;

use arena_shared::{
    math::{Quat, Vec3},
    net::PlayerEntry,
};

/// Per-tick smoothing rate; the blend factor is `min(1, dt * RATE)`.
pub const SMOOTHING_RATE: f32 = 10.0;

/// A non-local player as tracked by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: String,
    pub username: String,
    /// What is drawn this frame.
    pub position: Vec3,
    pub rotation: Quat,
    /// Latest snapshot values.
    pub target: Vec3,
    pub yaw: f32,
}

impl RemotePlayer {
    /// Starts at the origin with a zeroed target; the first snapshot sets it.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            target: Vec3::ZERO,
            yaw: 0.0,
        }
    }

    pub fn simulate(&mut self, dt: f32) {
        let t = (dt * SMOOTHING_RATE).min(1.0);
        self.position = self.position.lerp(self.target, t);

        let mut target = Quat::from_yaw(self.yaw);
        if self.rotation.dot(target) < 0.0 {
            target = -target;
        }
        self.rotation = self.rotation.slerp(target, t);
    }
}

/// Outcome of one snapshot application.
#[derive(Debug, Default)]
pub struct RemoteChanges {
    pub spawned: Vec<String>,
    /// Ownership passes to the caller, which disposes each exactly once.
    pub despawned: Vec<RemotePlayer>,
}

/// Tracked remote players, keyed by connection id.
#[derive(Debug, Default)]
pub struct RemoteInterpolator {
    remotes: BTreeMap<String, RemotePlayer>,
}

impl RemoteInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles the tracked set with a snapshot's players.
    ///
    /// Afterwards the tracked ids equal the snapshot ids minus `local_id`.
    /// Rendered positions are never touched here.
    pub fn apply_snapshot(
        &mut self,
        players: &BTreeMap<String, PlayerEntry>,
        local_id: Option<&str>,
    ) -> RemoteChanges {
        let mut changes = RemoteChanges::default();
        let is_remote = |id: &str| Some(id) != local_id;

        let stale: Vec<String> = self
            .remotes
            .keys()
            .filter(|id| !players.contains_key(*id) || !is_remote(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(remote) = self.remotes.remove(&id) {
                changes.despawned.push(remote);
            }
        }

        for (id, entry) in players.iter().filter(|(id, _)| is_remote(id.as_str())) {
            let remote = self.remotes.entry(id.clone()).or_insert_with(|| {
                changes.spawned.push(id.clone());
                RemotePlayer::new(id.clone(), entry.username.clone())
            });
            remote.target = entry.pose.position();
            remote.yaw = entry.pose.yaw;
            if remote.username != entry.username {
                remote.username = entry.username.clone();
            }
        }

        changes
    }

    pub fn simulate(&mut self, dt: f32) {
        for remote in self.remotes.values_mut() {
            remote.simulate(dt);
        }
    }

    pub fn get(&self, id: &str) -> Option<&RemotePlayer> {
        self.remotes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.remotes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.remotes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::net::PlayerPose;

    fn players(entries: &[(&str, f32, &str)]) -> BTreeMap<String, PlayerEntry> {
        entries
            .iter()
            .map(|(id, x, name)| {
                (
                    id.to_string(),
                    PlayerEntry {
                        pose: PlayerPose::new(Vec3::new(*x, 1.0, 0.0), 0.5),
                        username: name.to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn tracked_set_follows_snapshot_minus_self() {
        let mut interp = RemoteInterpolator::new();
        let first = interp.apply_snapshot(
            &players(&[("me", 0.0, "Me"), ("a", 1.0, "A"), ("b", 2.0, "B")]),
            Some("me"),
        );
        assert_eq!(first.spawned, vec!["a".to_string(), "b".to_string()]);
        assert!(first.despawned.is_empty());

        let second = interp.apply_snapshot(
            &players(&[("me", 0.0, "Me"), ("b", 2.0, "B"), ("c", 3.0, "C")]),
            Some("me"),
        );
        assert_eq!(interp.ids().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(second.spawned, vec!["c".to_string()]);
        assert_eq!(second.despawned.len(), 1);
        assert_eq!(second.despawned[0].id, "a");

        // Already gone; nothing to dispose a second time.
        let third = interp.apply_snapshot(
            &players(&[("me", 0.0, "Me"), ("b", 2.0, "B"), ("c", 3.0, "C")]),
            Some("me"),
        );
        assert!(third.despawned.is_empty());
    }

    #[test]
    fn snapshot_sets_target_but_not_rendered_position() {
        let mut interp = RemoteInterpolator::new();
        interp.apply_snapshot(&players(&[("a", 5.0, "A")]), None);
        let a = interp.get("a").unwrap();
        assert_eq!(a.position, Vec3::ZERO);
        assert_eq!(a.target, Vec3::new(5.0, 1.0, 0.0));
        assert_eq!(a.yaw, 0.5);
    }

    #[test]
    fn username_changes_are_picked_up() {
        let mut interp = RemoteInterpolator::new();
        interp.apply_snapshot(&players(&[("a", 0.0, "Player")]), None);
        interp.apply_snapshot(&players(&[("a", 0.0, "Renamed")]), None);
        assert_eq!(interp.get("a").unwrap().username, "Renamed");
    }

    #[test]
    fn converges_monotonically_without_overshoot() {
        let mut interp = RemoteInterpolator::new();
        interp.apply_snapshot(&players(&[("a", 8.0, "A")]), None);

        let mut last = 0.0_f32;
        for _ in 0..120 {
            interp.simulate(1.0 / 60.0);
            let x = interp.get("a").unwrap().position.x;
            assert!(x >= last, "{x} went backwards from {last}");
            assert!(x <= 8.0, "{x} overshot");
            last = x;
        }
        assert!((last - 8.0).abs() < 1e-3);
    }

    #[test]
    fn large_step_snaps_to_target() {
        let mut remote = RemotePlayer::new("a", "A");
        remote.target = Vec3::new(1.0, 2.0, 3.0);
        remote.yaw = 1.0;
        remote.simulate(0.5);
        assert_eq!(remote.position, remote.target);
        let expected = Quat::from_yaw(1.0);
        assert!(remote.rotation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn rotation_takes_the_short_way_round() {
        let mut remote = RemotePlayer::new("a", "A");
        remote.rotation = Quat::from_yaw(3.0);
        remote.yaw = -3.0;
        remote.simulate(1.0 / 60.0);
        // Going the long way would pass through yaw 0.
        let toward_zero = Quat::IDENTITY;
        assert!(remote.rotation.dot(toward_zero).abs() < 0.1);
    }
}
