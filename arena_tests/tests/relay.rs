//! Relay behavior over real sockets, driven by bare WebSocket peers.

use arena_server::bind_ephemeral;
use arena_shared::net::{ClientMsg, PlayerPose, DEFAULT_USERNAME};
use arena_shared::math::Vec3;
use arena_tests::{init_tracing, RawPeer};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn welcome_assigns_unique_ids_and_lists_blocks() -> anyhow::Result<()> {
    init_tracing();
    let (_addr, cfg) = bind_ephemeral(20).await?;

    let mut a = RawPeer::connect(&cfg.ws_url()).await?;
    let mut b = RawPeer::connect(&cfg.ws_url()).await?;
    let (id_a, blocks) = a.welcome().await?;
    let (id_b, _) = b.welcome().await?;

    assert_ne!(id_a, id_b);
    assert_eq!(id_a.len(), 10);
    assert_eq!(blocks.len(), 6);
    assert!(blocks.iter().all(|blk| blk.health == 100));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_and_hello_reach_other_peers() -> anyhow::Result<()> {
    init_tracing();
    let (_addr, cfg) = bind_ephemeral(20).await?;

    let mut a = RawPeer::connect(&cfg.ws_url()).await?;
    let (id_a, _) = a.welcome().await?;
    let mut b = RawPeer::connect(&cfg.ws_url()).await?;
    b.welcome().await?;

    // Before any state the pose is all zeros and the name is the default.
    let snap = b.snapshot_where(|s| s.players.contains_key(&id_a)).await?;
    assert_eq!(snap.players[&id_a].pose, PlayerPose::default());
    assert_eq!(snap.players[&id_a].username, DEFAULT_USERNAME);

    a.send(&ClientMsg::Hello {
        username: "Ana".into(),
    })
    .await?;
    a.send(&ClientMsg::State(PlayerPose::new(Vec3::new(3.0, 1.5, -2.0), 0.75)))
        .await?;

    let snap = b
        .snapshot_where(|s| s.players.get(&id_a).is_some_and(|p| p.pose.x == 3.0))
        .await?;
    let entry = &snap.players[&id_a];
    assert_eq!(entry.username, "Ana");
    assert_eq!(entry.pose.position(), Vec3::new(3.0, 1.5, -2.0));
    assert_eq!(entry.pose.yaw, 0.75);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hits_are_shared_and_floor_at_zero() -> anyhow::Result<()> {
    init_tracing();
    let (_addr, cfg) = bind_ephemeral(20).await?;

    let mut a = RawPeer::connect(&cfg.ws_url()).await?;
    a.welcome().await?;
    let mut b = RawPeer::connect(&cfg.ws_url()).await?;
    b.welcome().await?;

    let hit = ClientMsg::HitBlock {
        block_id: "block-2".into(),
    };
    a.send(&hit).await?;
    let health = |s: &arena_shared::net::Snapshot| {
        s.blocks
            .iter()
            .find(|blk| blk.id == "block-2")
            .map(|blk| blk.health)
    };
    let snap = b.snapshot_where(|s| health(s) == Some(75)).await?;
    assert_eq!(snap.blocks.iter().filter(|blk| blk.health == 100).count(), 5);

    // Unknown ids change nothing; extra hits never go below zero.
    b.send(&ClientMsg::HitBlock {
        block_id: "missing".into(),
    })
    .await?;
    for _ in 0..5 {
        b.send(&hit).await?;
    }
    let snap = a.snapshot_where(|s| health(s) == Some(0)).await?;
    assert_eq!(snap.blocks.len(), 6);
    assert!(snap.blocks.iter().all(|blk| blk.health >= 0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn junk_frames_do_not_drop_the_connection() -> anyhow::Result<()> {
    init_tracing();
    let (_addr, cfg) = bind_ephemeral(20).await?;

    let mut a = RawPeer::connect(&cfg.ws_url()).await?;
    let (id, _) = a.welcome().await?;
    a.send_text("not json").await?;
    a.send_text(r#"{"t":"teleport","x":1}"#).await?;
    a.send_text(r#"{"t":"state","x":"fast"}"#).await?;
    a.send(&ClientMsg::State(PlayerPose::new(Vec3::new(-4.0, 0.0, 0.0), 0.0)))
        .await?;

    let snap = a
        .snapshot_where(|s| s.players.get(&id).is_some_and(|p| p.pose.x == -4.0))
        .await?;
    assert_eq!(snap.players.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn departed_players_leave_the_snapshot() -> anyhow::Result<()> {
    init_tracing();
    let (_addr, cfg) = bind_ephemeral(20).await?;

    let mut a = RawPeer::connect(&cfg.ws_url()).await?;
    let (id_a, _) = a.welcome().await?;
    let mut b = RawPeer::connect(&cfg.ws_url()).await?;
    let (id_b, _) = b.welcome().await?;

    a.snapshot_where(|s| s.players.contains_key(&id_b)).await?;
    b.close().await?;

    let snap = a.snapshot_where(|s| !s.players.contains_key(&id_b)).await?;
    assert!(snap.players.contains_key(&id_a));
    assert_eq!(snap.players.len(), 1);
    Ok(())
}
