//! Standalone relay server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--addr 0.0.0.0:8787] [--name Arena] [--snapshot-hz 15]
//!
//! `PORT` and `ARENA_SERVER_NAME` override the defaults; a `.env` file in the
//! working directory is loaded first. `LOG_FORMAT=json` switches log output
//! to JSON.

use std::env;

use arena_shared::config::{ArenaConfig, DEFAULT_PORT};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

fn parse_args(mut cfg: ArenaConfig) -> ArenaConfig {
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.server_name = args[i + 1].clone();
                i += 2;
            }
            "--snapshot-hz" if i + 1 < args.len() => {
                cfg.snapshot_hz = args[i + 1].parse().unwrap_or(15);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    // Listen on every interface so LAN peers can discover the relay.
    let defaults = ArenaConfig {
        server_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
        ..ArenaConfig::default()
    };
    let cfg = parse_args(defaults.with_env_overrides());
    tracing::info!(addr = %cfg.server_addr, name = %cfg.server_name, "Starting relay");

    arena_server::bind_and_run(&cfg).await
}
