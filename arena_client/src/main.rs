//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--addr 127.0.0.1:8787] [--name Player] [--duration 30]
//!
//! The client connects to the relay, builds a small arena in the built-in
//! physics world and drives a scripted input pattern (walk, turn, jump, fire)
//! at render cadence until Ctrl-C or the optional duration elapses.

use std::env;
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Context;
use arena_client::{
    client::{NetClient, ReconnectPolicy},
    input::{InputState, Keys},
    GameLoop,
};
use arena_shared::{
    config::ArenaConfig,
    math::Vec3,
    physics::{PhysicsConfig, PhysicsService, SimplePhysics},
    render::NullRenderer,
};
use tracing::{info, warn};

const ARENA_HALF: f32 = 20.0;
const WALL_HEIGHT: f32 = 3.0;
const RENDER_HZ: f64 = 60.0;

struct Args {
    cfg: ArenaConfig,
    duration: Option<Duration>,
}

fn parse_args() -> Args {
    let mut cfg = ArenaConfig::default();
    let mut duration = None;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--duration" if i + 1 < args.len() => {
                duration = args[i + 1].parse().ok().map(Duration::from_secs_f64);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Args { cfg, duration }
}

/// Ground slab plus four boundary walls.
fn build_arena(physics: &mut dyn PhysicsService) -> anyhow::Result<()> {
    let span = ARENA_HALF * 2.0;
    physics
        .create_static_ground(Vec3::new(span, 1.0, span))
        .context("create ground")?;
    let h = WALL_HEIGHT * 0.5;
    let walls = [
        (Vec3::new(0.0, h, -ARENA_HALF), Vec3::new(span, WALL_HEIGHT, 1.0)),
        (Vec3::new(0.0, h, ARENA_HALF), Vec3::new(span, WALL_HEIGHT, 1.0)),
        (Vec3::new(-ARENA_HALF, h, 0.0), Vec3::new(1.0, WALL_HEIGHT, span)),
        (Vec3::new(ARENA_HALF, h, 0.0), Vec3::new(1.0, WALL_HEIGHT, span)),
    ];
    for (position, size) in walls {
        physics
            .create_static_wall(position, size)
            .context("create wall")?;
    }
    Ok(())
}

/// Scripted stand-in for keyboard and mouse.
fn drive_input(input: &mut InputState, t: f64) {
    input.set_key(Keys::FORWARD, true);
    input.set_key(Keys::SPRINT, (t % 6.0) > 4.0);
    input.set_key(Keys::JUMP, (t % 2.0) < 0.1);
    if (t % 4.0) < 1.0 {
        input.add_look(4.0, 0.0);
    }
    if (t % 0.5) < 1.0 / RENDER_HZ {
        input.press_fire();
    }
}

type Game = GameLoop<SimplePhysics, NetClient>;

/// Renders at `RENDER_HZ` until `shutdown` resolves.
///
/// `shutdown` is created once and polled across iterations, so a signal that
/// lands while a frame is running is seen on the next turn of the loop.
async fn run_frames<F>(
    game: &mut Game,
    renderer: &mut NullRenderer,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = &'static str>,
{
    tokio::pin!(shutdown);

    let mut frames = tokio::time::interval(Duration::from_secs_f64(1.0 / RENDER_HZ));
    let mut status = tokio::time::interval(Duration::from_secs(2));
    let started = Instant::now();
    let mut last = Instant::now();

    loop {
        tokio::select! {
            reason = &mut shutdown => {
                info!(reason, "Stopping");
                return Ok(());
            }
            _ = frames.tick() => {
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64();
                last = now;

                drive_input(game.input_mut(), started.elapsed().as_secs_f64());
                game.frame(elapsed, renderer).context("frame")?;
            }
            _ = status.tick() => {
                let net = game.net();
                info!(
                    id = net.id().unwrap_or("-"),
                    state = ?net.state(),
                    peers = net.peers(),
                    rtt_ms = net.rtt().map(|d| d.as_millis() as u64),
                    remotes = game.remotes().len(),
                    blocks = game.blocks().len(),
                    fps = game.stats().fps,
                    grounded = game.player().controller().is_on_ground(),
                    "Status"
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, duration } = parse_args();
    let url = cfg.ws_url();
    info!(url = %url, name = %cfg.player_name, "Starting client");

    let mut physics = SimplePhysics::new(PhysicsConfig::default());
    physics.init();
    build_arena(&mut physics)?;

    let mut net = NetClient::new(ReconnectPolicy::from_config(&cfg));
    net.connect(&url, &cfg.player_name);

    let mut game = GameLoop::new(physics, net, &cfg).context("spawn local player")?;
    let mut renderer = NullRenderer::default();
    game.start();

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    let shutdown = async {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "Ctrl-C listener failed");
                }
                "Interrupted"
            }
            _ = deadline => "Duration elapsed",
        }
    };
    run_frames(&mut game, &mut renderer, shutdown).await?;

    game.stop();
    game.net_mut().close();
    info!(frames = renderer.frames, ticks = game.ticks(), "Client stopped");
    Ok(())
}
