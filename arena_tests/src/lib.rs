//! Shared helpers for the socket-level integration tests.

use std::time::Duration;

use anyhow::{bail, Context};
use arena_client::client::{NetClient, NetEvent};
use arena_client::NetLink;
use arena_shared::net::{decode, encode, Block, ClientMsg, Decoded, ServerMsg, Snapshot};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for any single wait in a test.
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A bare WebSocket speaking the relay protocol.
pub struct RawPeer {
    ws: WsStream,
}

impl RawPeer {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(url).await.context("connect raw peer")?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        self.send_text(&encode(msg)?).await
    }

    pub async fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .context("send text")
    }

    /// Next decodable server message.
    pub async fn recv(&mut self) -> anyhow::Result<ServerMsg> {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Decoded::Msg(msg) = decode::<ServerMsg>(text.as_str()) {
                            return Ok(msg);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => bail!("socket closed"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("recv"),
                }
            }
        })
        .await
        .context("timed out waiting for a message")?
    }

    /// Reads the welcome and returns the assigned id plus its block list.
    pub async fn welcome(&mut self) -> anyhow::Result<(String, Vec<Block>)> {
        match self.recv().await? {
            ServerMsg::Welcome { id, blocks } => Ok((id, blocks.unwrap_or_default())),
            other => bail!("expected welcome, got {other:?}"),
        }
    }

    /// Skips snapshots until one satisfies `pred`.
    pub async fn snapshot_where<F>(&mut self, mut pred: F) -> anyhow::Result<Snapshot>
    where
        F: FnMut(&Snapshot) -> bool,
    {
        loop {
            if let ServerMsg::Snapshot(snap) = self.recv().await? {
                if pred(&snap) {
                    return Ok(snap);
                }
            }
        }
    }

    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await.context("close raw peer")
    }
}

/// Polls `client` until `pred` holds, collecting every drained event.
pub async fn poll_until<F>(client: &mut NetClient, mut pred: F) -> anyhow::Result<Vec<NetEvent>>
where
    F: FnMut(&NetClient, &[NetEvent]) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            seen.extend(client.poll());
            if pred(client, &seen) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("timed out polling the net client")?;
    Ok(seen)
}
