//! Relay server.
//!
//! One relay task owns [`RelayState`] and processes connection events one at
//! a time. The same task fires the snapshot timer, so broadcasts never overlap
//! message handling. Each snapshot is serialized once and fanned out to every
//! connection as shared bytes.
//!
//! Routes:
//! - `GET /ws`: WebSocket relay
//! - `GET /info`: LAN discovery

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use arena_shared::{
    config::ArenaConfig,
    net::{decode, encode, ClientMsg, Decoded, DiscoveryInfo, ServerMsg},
};
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, oneshot, watch},
};
use tracing::{debug, error, info, warn};

use crate::relay::{Applied, RelayState};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

/// Inputs to the relay task.
#[derive(Debug)]
pub enum RelayEvent {
    Join { reply: oneshot::Sender<Joined> },
    Message { id: String, msg: ClientMsg },
    Leave { id: String },
}

#[derive(Debug)]
pub struct Joined {
    pub id: String,
    pub welcome: Utf8Bytes,
}

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub events_tx: mpsc::Sender<RelayEvent>,
    pub snapshots_tx: broadcast::Sender<Utf8Bytes>,
    pub players_rx: watch::Receiver<usize>,
    pub name: String,
    pub port: u16,
}

/// Owns the relay state. Exits when every event sender is gone.
pub async fn relay_task(
    mut relay: RelayState,
    mut events_rx: mpsc::Receiver<RelayEvent>,
    snapshots_tx: broadcast::Sender<Utf8Bytes>,
    players_tx: watch::Sender<usize>,
    snapshot_interval: Duration,
) {
    let mut ticker = tokio::time::interval(snapshot_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            ev = events_rx.recv() => {
                let Some(ev) = ev else {
                    debug!("Relay event channel closed; relay task exiting");
                    break;
                };
                match ev {
                    RelayEvent::Join { reply } => {
                        let (id, welcome) = relay.join();
                        let welcome = match encode(&welcome) {
                            Ok(text) => Utf8Bytes::from(text),
                            Err(e) => {
                                error!(error = %e, "Failed to serialize welcome");
                                relay.leave(&id);
                                continue;
                            }
                        };
                        if reply.send(Joined { id: id.clone(), welcome }).is_err() {
                            // Connection went away before it was answered.
                            relay.leave(&id);
                        }
                    }
                    RelayEvent::Message { id, msg } => {
                        if let Applied::NoSuchPlayer = relay.handle(&id, msg) {
                            debug!(id = %id, "Message from departed connection dropped");
                        }
                    }
                    RelayEvent::Leave { id } => {
                        relay.leave(&id);
                    }
                }
                let _ = players_tx.send(relay.player_count());
            }
            _ = ticker.tick() => {
                let msg = ServerMsg::Snapshot(relay.snapshot());
                match encode(&msg) {
                    // No receivers is fine; nobody is connected.
                    Ok(text) => {
                        let _ = snapshots_tx.send(Utf8Bytes::from(text));
                    }
                    Err(e) => error!(error = %e, "Failed to serialize snapshot"),
                }
            }
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/info", get(info_handler))
        .with_state(Arc::new(state))
}

async fn info_handler(State(state): State<Arc<AppState>>) -> Json<DiscoveryInfo> {
    Json(DiscoveryInfo {
        name: state.name.clone(),
        port: state.port,
        players: *state.players_rx.borrow(),
        status: "online".to_string(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    // Subscribe before joining so the first snapshot after the welcome is not missed.
    let mut snapshots_rx = state.snapshots_tx.subscribe();

    let (reply_tx, reply_rx) = oneshot::channel();
    if state
        .events_tx
        .send(RelayEvent::Join { reply: reply_tx })
        .await
        .is_err()
    {
        warn!("Relay task is gone; refusing connection");
        return;
    }
    let Ok(Joined { id, welcome }) = reply_rx.await else {
        warn!("Relay task dropped the join request");
        return;
    };

    if let Err(e) = socket.send(Message::Text(welcome)).await {
        debug!(id = %id, error = %e, "Failed to send welcome");
    } else {
        run_connection(&mut socket, &id, &state, &mut snapshots_rx).await;
    }

    let _ = state.events_tx.send(RelayEvent::Leave { id: id.clone() }).await;
    debug!(id = %id, "Connection closed");
}

async fn run_connection(
    socket: &mut WebSocket,
    id: &str,
    state: &AppState,
    snapshots_rx: &mut broadcast::Receiver<Utf8Bytes>,
) {
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(id = %id, error = %e, "Socket error");
                        return;
                    }
                };
                match decode::<ClientMsg>(text.as_str()) {
                    Decoded::Msg(msg) => {
                        let ev = RelayEvent::Message { id: id.to_string(), msg };
                        if state.events_tx.send(ev).await.is_err() {
                            return;
                        }
                    }
                    Decoded::Unknown { tag } => debug!(id = %id, tag = %tag, "Ignoring unknown message"),
                    Decoded::Malformed { reason } => {
                        warn!(id = %id, reason = %reason, "Dropping malformed message");
                    }
                }
            }
            snapshot = snapshots_rx.recv() => match snapshot {
                Ok(bytes) => {
                    if socket.send(Message::Text(bytes)).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Every snapshot is complete; the next one catches up.
                    debug!(id = %id, missed = n, "Snapshot receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

/// Starts the relay task and serves the router on `listener`.
pub async fn run(listener: TcpListener, cfg: &ArenaConfig) -> anyhow::Result<()> {
    let address = listener.local_addr().context("listener local_addr")?;
    let app = build(address, cfg);

    info!(%address, name = %cfg.server_name, snapshot_hz = cfg.snapshot_hz, "Relay listening");
    axum::serve(listener, app)
        .await
        .inspect_err(|e| error!(error = %e, "Server error"))
        .context("serve")
}

/// Spawns the relay task and returns the router wired to it.
pub fn build(address: SocketAddr, cfg: &ArenaConfig) -> Router {
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (snapshots_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
    let (players_tx, players_rx) = watch::channel(0usize);

    tokio::spawn(relay_task(
        RelayState::default(),
        events_rx,
        snapshots_tx.clone(),
        players_tx,
        cfg.snapshot_interval(),
    ));

    router(AppState {
        events_tx,
        snapshots_tx,
        players_rx,
        name: cfg.server_name.clone(),
        port: address.port(),
    })
}

/// Binds `addr` and runs until the server fails.
pub async fn bind_and_run(cfg: &ArenaConfig) -> anyhow::Result<()> {
    let address: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
    let listener = TcpListener::bind(address)
        .await
        .inspect_err(|e| error!(%address, error = %e, "Failed to bind"))
        .with_context(|| format!("bind {address}"))?;
    run(listener, cfg).await
}

/// Binds an ephemeral local port and serves in the background.
pub async fn bind_ephemeral(snapshot_hz: u32) -> anyhow::Result<(SocketAddr, ArenaConfig)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral")?;
    let address = listener.local_addr().context("listener local_addr")?;
    let cfg = ArenaConfig {
        server_addr: address.to_string(),
        snapshot_hz,
        ..ArenaConfig::default()
    };
    let app = build(address, &cfg);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Server error");
        }
    });
    Ok((address, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_shared::net::PlayerPose;

    type Handles = (
        mpsc::Sender<RelayEvent>,
        broadcast::Receiver<Utf8Bytes>,
        watch::Receiver<usize>,
    );

    fn spawn_task(interval: Duration) -> Handles {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (snapshots_tx, snapshots_rx) = broadcast::channel(16);
        let (players_tx, players_rx) = watch::channel(0);
        tokio::spawn(relay_task(
            RelayState::default(),
            events_rx,
            snapshots_tx,
            players_tx,
            interval,
        ));
        (events_tx, snapshots_rx, players_rx)
    }

    async fn join(events: &mpsc::Sender<RelayEvent>) -> Joined {
        let (reply, rx) = oneshot::channel();
        events.send(RelayEvent::Join { reply }).await.unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn join_replies_with_welcome_and_counts_players() {
        let (events, _snaps, mut players) = spawn_task(Duration::from_secs(60));
        let joined = join(&events).await;

        let welcome: ServerMsg = serde_json::from_str(joined.welcome.as_str()).unwrap();
        assert!(matches!(welcome, ServerMsg::Welcome { ref id, blocks: Some(_) } if *id == joined.id));

        players.wait_for(|n| *n == 1).await.unwrap();
        events
            .send(RelayEvent::Leave { id: joined.id })
            .await
            .unwrap();
        players.wait_for(|n| *n == 0).await.unwrap();
    }

    #[tokio::test]
    async fn snapshots_reflect_processed_messages() {
        let (events, mut snaps, _players) = spawn_task(Duration::from_millis(20));
        let joined = join(&events).await;
        events
            .send(RelayEvent::Message {
                id: joined.id.clone(),
                msg: ClientMsg::State(PlayerPose {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                    yaw: 0.25,
                }),
            })
            .await
            .unwrap();

        let snap = loop {
            let bytes = snaps.recv().await.unwrap();
            let msg: ServerMsg = serde_json::from_str(bytes.as_str()).unwrap();
            let ServerMsg::Snapshot(snap) = msg else {
                panic!("expected snapshot");
            };
            if snap.players.get(&joined.id).is_some_and(|p| p.pose.x == 1.0) {
                break snap;
            }
        };
        assert_eq!(snap.players[&joined.id].pose.yaw, 0.25);
        assert_eq!(snap.blocks.len(), 6);
    }
}
