//! Fixed-timestep game loop.
//!
//! The render side calls [`GameLoop::frame`] with wall time elapsed since the
//! previous call. Simulation runs in whole fixed ticks; each frame renders
//! once no matter how many ticks ran.

use arena_shared::{
    config::ArenaConfig,
    math::Vec3,
    physics::{PhysicsError, PhysicsService},
    render::{AvatarView, BlockView, RenderBackend},
};
use tracing::debug;

use crate::{
    blocks::BlockSync,
    client::NetLink,
    controller::ControllerConfig,
    input::InputState,
    interp::RemoteInterpolator,
    player::{LocalPlayer, SPAWN_POINT},
    weapon::{Hitscan, Shot},
};

/// Accumulates clamped wall time and releases it in fixed steps.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    dt: f64,
    max_frame: f64,
    accumulator: f64,
}

impl FixedTimestep {
    pub fn new(dt: f64, max_frame: f64) -> Self {
        Self {
            dt,
            max_frame,
            accumulator: 0.0,
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Adds `elapsed` (clamped) and returns how many steps are due.
    pub fn advance(&mut self, elapsed: f64) -> u32 {
        self.accumulator += elapsed.clamp(0.0, self.max_frame);
        let mut steps = 0;
        while self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            steps += 1;
        }
        steps
    }

    /// Fraction of a step left over, in $[0,1)$.
    pub fn alpha(&self) -> f64 {
        self.accumulator / self.dt
    }
}

/// Frames per second over short windows, for a HUD.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub fps: f64,
    pub position: Vec3,
    frames: u32,
    window: f64,
}

impl FrameStats {
    pub const WINDOW_SECS: f64 = 0.25;

    /// Counts one frame. Returns the new rate when a window closes.
    pub fn record(&mut self, elapsed: f64, position: Vec3) -> Option<f64> {
        self.frames += 1;
        self.window += elapsed;
        if self.window < Self::WINDOW_SECS {
            return None;
        }
        self.fps = self.frames as f64 / self.window;
        self.position = position;
        self.frames = 0;
        self.window = 0.0;
        Some(self.fps)
    }
}

/// What one frame did.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub ticks: u32,
    pub shot: Option<Shot>,
}

/// Owns every piece of client simulation state.
pub struct GameLoop<P: PhysicsService, N: NetLink> {
    physics: P,
    net: N,
    player: LocalPlayer,
    remotes: RemoteInterpolator,
    blocks: BlockSync,
    weapon: Hitscan,
    input: InputState,
    timestep: FixedTimestep,
    stats: FrameStats,
    sim_time: f64,
    ticks: u64,
    running: bool,
}

impl<P: PhysicsService, N: NetLink> GameLoop<P, N> {
    /// Spawns the local player. Fails if physics is not ready yet.
    pub fn new(mut physics: P, net: N, cfg: &ArenaConfig) -> Result<Self, PhysicsError> {
        let player = LocalPlayer::spawn(&mut physics, SPAWN_POINT, ControllerConfig::default())?;
        Ok(Self {
            physics,
            net,
            player,
            remotes: RemoteInterpolator::new(),
            blocks: BlockSync::new(),
            weapon: Hitscan::new(),
            input: InputState::default(),
            timestep: FixedTimestep::new(cfg.fixed_dt(), cfg.max_frame_secs),
            stats: FrameStats::default(),
            sim_time: 0.0,
            ticks: 0,
            running: false,
        })
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stops simulating. The connection stays open until closed explicitly.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn player(&self) -> &LocalPlayer {
        &self.player
    }

    pub fn remotes(&self) -> &RemoteInterpolator {
        &self.remotes
    }

    pub fn blocks(&self) -> &BlockSync {
        &self.blocks
    }

    pub fn weapon(&self) -> &Hitscan {
        &self.weapon
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut N {
        &mut self.net
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One render callback.
    pub fn frame(
        &mut self,
        elapsed: f64,
        renderer: &mut dyn RenderBackend,
    ) -> Result<FrameReport, PhysicsError> {
        let mut report = FrameReport::default();
        if !self.running {
            return Ok(report);
        }

        // Look deltas accumulate per frame, so they are consumed per frame.
        self.player
            .apply_look(self.input.look_dx, self.input.look_dy);

        report.ticks = self.timestep.advance(elapsed);
        let dt = self.timestep.dt() as f32;
        for _ in 0..report.ticks {
            self.tick(dt)?;
        }

        if self.input.fire {
            let origin = self.player.eye_position(&self.physics)?;
            let dir = self.player.view_direction();
            report.shot = Some(self.weapon.fire(
                origin,
                dir,
                &mut self.blocks,
                &self.net,
                self.sim_time,
            ));
        }
        self.weapon.expire(self.sim_time);

        self.render(renderer)?;
        self.input.reset_per_frame();

        let position = self.player.position(&self.physics)?;
        if let Some(fps) = self.stats.record(elapsed, position) {
            debug!(fps, pos = ?position, "Frame stats");
        }

        Ok(report)
    }

    fn tick(&mut self, dt: f32) -> Result<(), PhysicsError> {
        self.player.update(&mut self.physics, dt, &self.input)?;
        self.physics.step(dt);
        self.net.send_state(self.player.pose(&self.physics)?);

        self.net.poll();
        if let Some(initial) = self.net.take_initial_blocks() {
            // A new session replaces whatever the previous one left behind.
            self.blocks.reset(&mut self.physics);
            self.blocks.apply(&initial, &mut self.physics);
        }
        if let Some(snap) = self.net.latest_snapshot() {
            let changes = self.remotes.apply_snapshot(&snap.players, self.net.local_id());
            for id in &changes.spawned {
                debug!(player = %id, "Remote player joined");
            }
            for remote in changes.despawned {
                debug!(player = %remote.id, "Remote player left");
            }
            self.blocks.apply(&snap.blocks, &mut self.physics);
        }
        self.remotes.simulate(dt);
        self.blocks.ensure_bodies(&mut self.physics);

        self.sim_time += dt as f64;
        self.ticks += 1;
        Ok(())
    }

    fn render(&self, renderer: &mut dyn RenderBackend) -> Result<(), PhysicsError> {
        renderer.begin_frame();
        let eye = self.player.eye_position(&self.physics)?;
        renderer.set_camera(eye, self.player.yaw, self.player.pitch);

        for remote in self.remotes.iter() {
            renderer.draw_avatar(AvatarView {
                id: &remote.id,
                username: &remote.username,
                position: remote.position,
                rotation: remote.rotation,
            });
        }
        for tracked in self.blocks.iter().filter(|t| !t.destroyed) {
            renderer.draw_block(BlockView {
                id: &tracked.block.id,
                position: tracked.block.position(),
                health: tracked.block.health,
                label_visible: tracked.label_visible(self.sim_time),
            });
        }
        for tracer in self.weapon.tracers() {
            renderer.draw_tracer(tracer.from, tracer.to);
        }
        renderer.end_frame();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::BTreeMap, sync::Arc};

    use super::*;
    use arena_shared::{
        net::{Block, PlayerEntry, PlayerPose, Snapshot},
        physics::{PhysicsConfig, SimplePhysics},
        render::NullRenderer,
    };

    use crate::client::NetEvent;

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn step_count_is_independent_of_chunking() {
        let total = 10.0;
        for chunk in [0.001, 0.007, 1.0 / 60.0, 0.05, 0.2] {
            let mut ts = FixedTimestep::new(DT, 0.25);
            let mut steps = 0u64;
            let mut elapsed = 0.0;
            while elapsed + chunk <= total + 1e-9 {
                steps += ts.advance(chunk) as u64;
                elapsed += chunk;
            }
            let expected = (elapsed / DT).floor() as i64;
            assert!(
                (steps as i64 - expected).abs() <= 1,
                "chunk {chunk}: {steps} vs {expected}"
            );
        }
    }

    #[test]
    fn long_frames_are_clamped() {
        let mut ts = FixedTimestep::new(DT, 0.25);
        let steps = ts.advance(5.0);
        assert!((14..=15).contains(&steps), "{steps}");
        assert!(ts.alpha() < 1.0);
    }

    #[test]
    fn fps_is_reported_per_window() {
        let mut stats = FrameStats::default();
        let mut reported = None;
        for _ in 0..20 {
            if let Some(fps) = stats.record(0.02, Vec3::ZERO) {
                reported = Some(fps);
            }
        }
        let fps = reported.unwrap();
        assert!((fps - 50.0).abs() < 1.0, "{fps}");
    }

    #[derive(Default)]
    struct ScriptedNet {
        id: Option<String>,
        snapshot: Option<Arc<Snapshot>>,
        initial: Option<Vec<Block>>,
        states: RefCell<Vec<PlayerPose>>,
        hits: RefCell<Vec<String>>,
        polls: usize,
    }

    impl NetLink for ScriptedNet {
        fn poll(&mut self) -> Vec<NetEvent> {
            self.polls += 1;
            Vec::new()
        }
        fn local_id(&self) -> Option<&str> {
            self.id.as_deref()
        }
        fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
            self.snapshot.clone()
        }
        fn take_initial_blocks(&mut self) -> Option<Vec<Block>> {
            self.initial.take()
        }
        fn send_state(&self, pose: PlayerPose) {
            self.states.borrow_mut().push(pose);
        }
        fn send_hit_block(&self, block_id: &str) {
            self.hits.borrow_mut().push(block_id.to_string());
        }
    }

    fn arena() -> SimplePhysics {
        let mut world = SimplePhysics::ready(PhysicsConfig::default());
        world
            .create_static_ground(Vec3::new(40.0, 1.0, 40.0))
            .unwrap();
        world
    }

    fn entry(x: f32) -> PlayerEntry {
        PlayerEntry {
            pose: PlayerPose::new(Vec3::new(x, 1.0, 0.0), 0.0),
            username: "Player".into(),
        }
    }

    #[test]
    fn unready_physics_is_fatal() {
        let world = SimplePhysics::new(PhysicsConfig::default());
        let res = GameLoop::new(world, ScriptedNet::default(), &ArenaConfig::default());
        assert!(matches!(res, Err(PhysicsError::NotReady)));
    }

    #[test]
    fn each_tick_sends_pose_and_polls() {
        let mut game =
            GameLoop::new(arena(), ScriptedNet::default(), &ArenaConfig::default()).unwrap();
        let mut renderer = NullRenderer::default();
        game.start();

        let report = game.frame(3.5 * DT, &mut renderer).unwrap();
        assert_eq!(report.ticks, 3);
        assert_eq!(game.net().states.borrow().len(), 3);
        assert_eq!(game.net().polls, 3);
        assert_eq!(renderer.frames, 1);

        // Render still happens when no tick is due.
        let report = game.frame(0.1 * DT, &mut renderer).unwrap();
        assert_eq!(report.ticks, 0);
        assert_eq!(renderer.frames, 2);
    }

    #[test]
    fn stopped_loop_does_nothing() {
        let mut game =
            GameLoop::new(arena(), ScriptedNet::default(), &ArenaConfig::default()).unwrap();
        let mut renderer = NullRenderer::default();
        let report = game.frame(0.1, &mut renderer).unwrap();
        assert_eq!(report.ticks, 0);
        assert_eq!(renderer.frames, 0);
        assert!(game.net().states.borrow().is_empty());
    }

    #[test]
    fn snapshot_drives_remotes_and_blocks() {
        let mut players = BTreeMap::new();
        players.insert("me".to_string(), entry(0.0));
        players.insert("other".to_string(), entry(4.0));
        let net = ScriptedNet {
            id: Some("me".into()),
            snapshot: Some(Arc::new(Snapshot {
                players,
                blocks: vec![Block::new("b1", Vec3::new(0.0, 0.5, -6.0))],
            })),
            ..ScriptedNet::default()
        };
        let mut game = GameLoop::new(arena(), net, &ArenaConfig::default()).unwrap();
        let mut renderer = NullRenderer::default();
        game.start();
        game.frame(DT, &mut renderer).unwrap();

        assert_eq!(game.remotes().ids().collect::<Vec<_>>(), vec!["other"]);
        let block = game.blocks().get("b1").unwrap();
        assert!(block.body.is_some());
        // Ground plus the block.
        assert_eq!(game.physics().static_count(), 2);
    }

    #[test]
    fn fresh_welcome_revives_destroyed_blocks() {
        let mut dead = Block::new("b1", Vec3::new(0.0, 0.5, -6.0));
        dead.health = 0;
        let net = ScriptedNet {
            initial: Some(vec![Block::new("b1", Vec3::new(0.0, 0.5, -6.0))]),
            snapshot: Some(Arc::new(Snapshot {
                players: BTreeMap::new(),
                blocks: vec![dead],
            })),
            ..ScriptedNet::default()
        };
        let mut game = GameLoop::new(arena(), net, &ArenaConfig::default()).unwrap();
        let mut renderer = NullRenderer::default();
        game.start();
        game.frame(DT, &mut renderer).unwrap();
        assert!(game.blocks().get("b1").unwrap().destroyed);
        assert_eq!(game.physics().static_count(), 1);

        // Relay restarted: the new session welcomes with the block alive.
        game.net_mut().snapshot = None;
        game.net_mut().initial = Some(vec![Block::new("b1", Vec3::new(0.0, 0.5, -6.0))]);
        game.frame(DT, &mut renderer).unwrap();

        let block = game.blocks().get("b1").unwrap();
        assert!(!block.destroyed);
        assert!(block.body.is_some());
        assert_eq!(game.physics().static_count(), 2);
    }

    #[test]
    fn fire_reports_hit_once_per_frame() {
        let net = ScriptedNet {
            initial: Some(vec![Block::new("b1", Vec3::new(0.0, 2.9, -6.0))]),
            ..ScriptedNet::default()
        };
        let mut game = GameLoop::new(arena(), net, &ArenaConfig::default()).unwrap();
        let mut renderer = NullRenderer::default();
        game.start();
        game.frame(DT, &mut renderer).unwrap();

        game.input_mut().press_fire();
        let report = game.frame(DT, &mut renderer).unwrap();
        let shot = report.shot.unwrap();
        assert_eq!(shot.block_id.as_deref(), Some("b1"));
        assert_eq!(*game.net().hits.borrow(), vec!["b1".to_string()]);
        assert_eq!(game.weapon().tracers().len(), 1);

        // Fire edge is cleared by the frame.
        let report = game.frame(DT, &mut renderer).unwrap();
        assert!(report.shot.is_none());
        assert_eq!(game.net().hits.borrow().len(), 1);
    }
}
