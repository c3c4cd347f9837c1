//! Network client.
//!
//! One WebSocket connection to the relay at a time, owned by a background
//! supervisor task. The game loop never touches the socket: it sends through
//! an unbounded channel and drains [`NetEvent`]s once per tick via
//! [`NetLink::poll`].
//!
//! Reconnection is only attempted after a session that received a welcome,
//! and is bounded by [`ReconnectPolicy::max_attempts`] consecutive failures.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use arena_shared::{
    config::ArenaConfig,
    net::{decode, encode, Block, ClientMsg, Decoded, PlayerPose, ServerMsg, Snapshot},
};
use futures::{SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or gave up.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting to retry after a dropped session.
    Reconnecting,
    /// Closed on request; never retries.
    Cancelled,
}

/// Something that happened on the socket since the last poll.
#[derive(Debug, Clone)]
pub enum NetEvent {
    Opened,
    Welcome {
        id: String,
        blocks: Option<Vec<Block>>,
        rtt: Duration,
    },
    Snapshot(Arc<Snapshot>),
    Closed {
        will_retry: bool,
    },
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    /// Transport failure; informational only.
    Error(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ArenaConfig) -> Self {
        Self {
            delay: cfg.reconnect_delay(),
            max_attempts: cfg.max_reconnect_attempts,
        }
    }
}

/// Whether to schedule reconnection attempt number `attempt` (1-based).
pub fn should_reconnect(welcomed_before: bool, attempt: u32, policy: &ReconnectPolicy) -> bool {
    welcomed_before && attempt <= policy.max_attempts
}

/// The network surface the game loop depends on.
pub trait NetLink {
    /// Drains pending events and folds them into the cached state.
    fn poll(&mut self) -> Vec<NetEvent>;
    fn local_id(&self) -> Option<&str>;
    fn latest_snapshot(&self) -> Option<Arc<Snapshot>>;
    /// Returns the welcome block list once.
    fn take_initial_blocks(&mut self) -> Option<Vec<Block>>;
    fn send_state(&self, pose: PlayerPose);
    fn send_hit_block(&self, block_id: &str);
}

/// Handle to the connection supervisor.
pub struct NetClient {
    policy: ReconnectPolicy,
    state: ConnectionState,
    id: Option<String>,
    rtt: Option<Duration>,
    latest: Option<Arc<Snapshot>>,
    initial_blocks: Option<Vec<Block>>,
    session: Option<Session>,
}

struct Session {
    open: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<ClientMsg>,
    events: mpsc::UnboundedReceiver<NetEvent>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Default for NetClient {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl NetClient {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            id: None,
            rtt: None,
            latest: None,
            initial_blocks: None,
            session: None,
        }
    }

    /// Starts connecting to `url`, closing any prior connection first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self, url: &str, username: &str) {
        self.shutdown_session();
        self.id = None;
        self.rtt = None;
        self.latest = None;
        self.initial_blocks = None;

        let open = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let supervisor = Supervisor {
            url: url.to_string(),
            username: username.to_string(),
            policy: self.policy,
            open: open.clone(),
            outbound: outbound_rx,
            events: events_tx,
            cancel: cancel_rx,
            welcomed_before: false,
            attempt: 0,
        };
        let task = tokio::spawn(supervisor.run());

        info!(url = %url, username = %username, "Connecting to relay");
        self.state = ConnectionState::Connecting;
        self.session = Some(Session {
            open,
            outbound: outbound_tx,
            events: events_rx,
            cancel: cancel_tx,
            task,
        });
    }

    /// Closes the socket and cancels any pending reconnection.
    pub fn close(&mut self) {
        if self.session.is_some() {
            self.shutdown_session();
            self.state = ConnectionState::Cancelled;
            info!("Connection closed by request");
        }
    }

    fn shutdown_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.open.store(false, Ordering::Release);
            // The supervisor sends a close frame on its own once it sees this.
            let _ = session.cancel.send(true);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Players in the latest snapshot, the local one included.
    pub fn peers(&self) -> usize {
        self.latest.as_ref().map_or(0, |s| s.players.len())
    }

    /// Time from hello to welcome on the most recent session.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    pub fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.open.load(Ordering::Acquire))
    }

    /// True once the supervisor task has exited.
    pub fn is_finished(&self) -> bool {
        self.session.as_ref().map_or(true, |s| s.task.is_finished())
    }

    fn send(&self, msg: ClientMsg) {
        let Some(session) = &self.session else {
            return;
        };
        if !session.open.load(Ordering::Acquire) {
            return;
        }
        let _ = session.outbound.send(msg);
    }

    fn apply(&mut self, event: &NetEvent) {
        match event {
            NetEvent::Opened => self.state = ConnectionState::Connected,
            NetEvent::Welcome { id, blocks, rtt } => {
                // Nothing from an earlier session carries over.
                self.id = Some(id.clone());
                self.rtt = Some(*rtt);
                self.latest = None;
                self.initial_blocks = Some(blocks.clone().unwrap_or_default());
            }
            NetEvent::Snapshot(snap) => self.latest = Some(snap.clone()),
            NetEvent::Closed { will_retry } => {
                if !will_retry {
                    self.state = ConnectionState::Disconnected;
                }
            }
            NetEvent::Reconnecting { .. } => self.state = ConnectionState::Reconnecting,
            NetEvent::Error(_) => {}
        }
    }
}

impl NetLink for NetClient {
    fn poll(&mut self) -> Vec<NetEvent> {
        let mut drained = Vec::new();
        if let Some(session) = self.session.as_mut() {
            while let Ok(event) = session.events.try_recv() {
                drained.push(event);
            }
        }
        for event in &drained {
            self.apply(event);
        }
        drained
    }

    fn local_id(&self) -> Option<&str> {
        self.id()
    }

    fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.latest.clone()
    }

    fn take_initial_blocks(&mut self) -> Option<Vec<Block>> {
        self.initial_blocks.take()
    }

    fn send_state(&self, pose: PlayerPose) {
        self.send(ClientMsg::State(pose));
    }

    fn send_hit_block(&self, block_id: &str) {
        self.send(ClientMsg::HitBlock {
            block_id: block_id.to_string(),
        });
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        self.shutdown_session();
    }
}

enum SessionEnd {
    Dropped,
    Cancelled,
}

struct Supervisor {
    url: String,
    username: String,
    policy: ReconnectPolicy,
    open: Arc<AtomicBool>,
    outbound: mpsc::UnboundedReceiver<ClientMsg>,
    events: mpsc::UnboundedSender<NetEvent>,
    cancel: watch::Receiver<bool>,
    welcomed_before: bool,
    attempt: u32,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            if let SessionEnd::Cancelled = self.session().await {
                return;
            }
            self.open.store(false, Ordering::Release);

            let next = self.attempt + 1;
            let retry = should_reconnect(self.welcomed_before, next, &self.policy);
            self.emit(NetEvent::Closed { will_retry: retry });
            if !retry {
                info!(url = %self.url, "Connection closed; not reconnecting");
                return;
            }

            self.attempt = next;
            let delay = self.policy.delay;
            info!(url = %self.url, attempt = next, ?delay, "Scheduling reconnect");
            self.emit(NetEvent::Reconnecting {
                attempt: next,
                delay,
            });
            tokio::select! {
                _ = cancelled(&mut self.cancel) => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session(&mut self) -> SessionEnd {
        // Nothing queued for a previous socket is replayed.
        while self.outbound.try_recv().is_ok() {}

        let connected = tokio::select! {
            _ = cancelled(&mut self.cancel) => return SessionEnd::Cancelled,
            r = connect_async(self.url.as_str()) => r,
        };
        let ws = match connected {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Connect failed");
                self.emit(NetEvent::Error(e.to_string()));
                return SessionEnd::Dropped;
            }
        };
        let (mut sink, mut stream) = ws.split();

        self.open.store(true, Ordering::Release);
        self.emit(NetEvent::Opened);

        let started = Instant::now();
        let hello = ClientMsg::Hello {
            username: self.username.clone(),
        };
        match encode(&hello) {
            Ok(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Failed to send hello");
                    return SessionEnd::Dropped;
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode hello"),
        }

        loop {
            tokio::select! {
                _ = cancelled(&mut self.cancel) => {
                    self.open.store(false, Ordering::Release);
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Cancelled;
                }
                Some(msg) = self.outbound.recv() => {
                    let text = match encode(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode outbound message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %e, "Send failed");
                        self.emit(NetEvent::Error(e.to_string()));
                        return SessionEnd::Dropped;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), started),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Relay closed the socket");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Socket error");
                        self.emit(NetEvent::Error(e.to_string()));
                        return SessionEnd::Dropped;
                    }
                },
            }
        }
    }

    fn handle_text(&mut self, text: &str, started: Instant) {
        match decode::<ServerMsg>(text) {
            Decoded::Msg(ServerMsg::Welcome { id, blocks }) => {
                let rtt = started.elapsed();
                info!(id = %id, rtt_ms = rtt.as_millis() as u64, "Welcome received");
                self.welcomed_before = true;
                self.attempt = 0;
                self.emit(NetEvent::Welcome { id, blocks, rtt });
            }
            Decoded::Msg(ServerMsg::Snapshot(snap)) => {
                self.emit(NetEvent::Snapshot(Arc::new(snap)));
            }
            Decoded::Unknown { tag } => debug!(tag = %tag, "Ignoring unknown message"),
            Decoded::Malformed { reason } => warn!(reason = %reason, "Dropping malformed message"),
        }
    }

    fn emit(&self, event: NetEvent) {
        // The handle may already be gone; nothing to report to then.
        let _ = self.events.send(event);
    }
}

/// Resolves once cancellation is requested or the handle is dropped.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_welcomed_never_retries() {
        let policy = ReconnectPolicy::default();
        assert!(!should_reconnect(false, 1, &policy));
    }

    #[test]
    fn retries_are_bounded() {
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts: 3,
        };
        assert!(should_reconnect(true, 1, &policy));
        assert!(should_reconnect(true, 3, &policy));
        assert!(!should_reconnect(true, 4, &policy));
    }

    #[test]
    fn sends_are_dropped_without_a_socket() {
        let client = NetClient::default();
        client.send_state(PlayerPose::default());
        client.send_hit_block("b1");
        assert!(!client.is_open());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_before_connecting_is_cancelled() {
        let mut client = NetClient::default();
        // Reserved port; nothing listens there.
        client.connect("ws://127.0.0.1:9/ws", "tester");
        assert_eq!(client.state(), ConnectionState::Connecting);
        client.close();
        assert_eq!(client.state(), ConnectionState::Cancelled);
        assert!(!client.is_open());
    }

    #[test]
    fn welcome_event_updates_cached_identity() {
        let mut client = NetClient::default();
        client.apply(&NetEvent::Welcome {
            id: "abc".into(),
            blocks: Some(vec![Block::new("b1", arena_shared::math::Vec3::ZERO)]),
            rtt: Duration::from_millis(12),
        });
        assert_eq!(client.local_id(), Some("abc"));
        assert_eq!(client.rtt(), Some(Duration::from_millis(12)));
        assert_eq!(client.take_initial_blocks().map(|b| b.len()), Some(1));
        assert!(client.take_initial_blocks().is_none());
    }

    #[tokio::test]
    async fn new_sessions_drop_the_previous_snapshot() {
        let mut client = NetClient::new(ReconnectPolicy {
            delay: Duration::from_secs(30),
            max_attempts: 0,
        });
        let old_snapshot = || {
            let mut snap = Snapshot::default();
            snap.players.insert(
                "old-self".into(),
                arena_shared::net::PlayerEntry {
                    pose: PlayerPose::default(),
                    username: "Player".into(),
                },
            );
            Arc::new(snap)
        };
        client.apply(&NetEvent::Welcome {
            id: "old-self".into(),
            blocks: Some(vec![Block::new("b1", arena_shared::math::Vec3::ZERO)]),
            rtt: Duration::from_millis(5),
        });
        client.apply(&NetEvent::Snapshot(old_snapshot()));
        assert_eq!(client.peers(), 1);

        // A welcome without blocks still replaces the old list.
        client.apply(&NetEvent::Welcome {
            id: "new-self".into(),
            blocks: None,
            rtt: Duration::from_millis(5),
        });
        assert!(client.latest_snapshot().is_none());
        assert_eq!(client.peers(), 0);
        assert_eq!(client.take_initial_blocks(), Some(Vec::new()));

        client.apply(&NetEvent::Snapshot(old_snapshot()));
        client.apply(&NetEvent::Welcome {
            id: "new-self".into(),
            blocks: Some(vec![Block::new("b1", arena_shared::math::Vec3::ZERO)]),
            rtt: Duration::from_millis(5),
        });
        client.apply(&NetEvent::Snapshot(old_snapshot()));

        // Connecting elsewhere forgets the id, the snapshot and unread blocks.
        client.connect("ws://127.0.0.1:1/ws", "Player");
        assert!(client.id().is_none());
        assert!(client.latest_snapshot().is_none());
        assert!(client.take_initial_blocks().is_none());
        assert_eq!(client.peers(), 0);
        client.close();
    }
}
