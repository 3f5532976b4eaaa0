mod support;

use std::time::Duration;

use arena::{
    game::{entity::Color, update::Update},
    network::{
        frame::{read_frame, write_frame},
        protocol::{Handshake, HandshakeReply, ProtocolError, UpdateGroup, DISCONNECTED_FRAME},
    },
    ArenaClient, CommandBatch, RequestKind,
};

const VERSION: &str = "test-client";

fn idle() -> CommandBatch {
    CommandBatch::default()
}

fn spawn_with(color: [i64; 3]) -> CommandBatch {
    CommandBatch::single(Some(RequestKind::Spawn {
        color: Some(color.to_vec()),
    }))
}

#[tokio::test]
async fn test_handshake_returns_snapshot() {
    let server = support::start_server().await;
    let mut stream = support::raw_connect(server.addr).await;

    support::send_json(
        &mut stream,
        &Handshake {
            player_id: "alice@arena.dev".to_string(),
            version: Some(VERSION.to_string()),
        },
    )
    .await;
    let reply: HandshakeReply = support::read_json(&mut stream).await;

    assert_eq!(reply.tick, reply.state.tick);
    assert!(reply.state.players.is_empty());
    assert_eq!(reply.state.map.obstacles.len(), 11);
    assert_eq!(reply.state.digest.len(), 64);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_spawn_replicated_to_other_players() {
    let server = support::start_server().await;
    let mut alice = ArenaClient::connect(server.addr, "alice@arena.dev", VERSION).await.unwrap();
    let mut bob = ArenaClient::connect(server.addr, "bob@arena.dev", VERSION).await.unwrap();
    let alice_id = alice.player_id().clone();

    let groups = alice.exchange(&spawn_with([255, 0, 0])).await.unwrap();
    assert!(groups.iter().flat_map(|g| &g.updates).any(|update| matches!(
        update,
        Update::PlayerStateChange { player_id, alive: Some(true), .. } if *player_id == alice_id
    )));
    assert!(alice.game().player_is_spawned(&alice_id));

    for _ in 0..20 {
        if bob.game().player_is_spawned(&alice_id) {
            break;
        }
        bob.exchange(&idle()).await.unwrap();
    }
    let seen_by_bob = bob.game().get_player(&alice_id).expect("alice replicated");
    assert_eq!(seen_by_bob.color, Some(Color([255, 0, 0])));
    assert_eq!(
        seen_by_bob.position,
        alice.game().get_player(&alice_id).unwrap().position
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_groups_are_consecutive() {
    let server = support::start_server().await;
    let mut client = ArenaClient::connect(server.addr, "carol@arena.dev", VERSION).await.unwrap();

    let mut last_tick = client.game().tick();
    for _ in 0..5 {
        let groups = client.exchange(&idle()).await.unwrap();
        assert!(!groups.is_empty());
        for group in groups {
            assert_eq!(group.tick, last_tick + 1);
            last_tick = group.tick;
        }
    }
    assert_eq!(client.game().tick(), last_tick);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_replica_digest_matches_later_snapshot() {
    let server = support::start_server().await;
    let mut alice = ArenaClient::connect(server.addr, "alice@arena.dev", VERSION).await.unwrap();
    alice.exchange(&spawn_with([10, 20, 30])).await.unwrap();
    alice
        .exchange(&CommandBatch::single(Some(RequestKind::Shoot)))
        .await
        .unwrap();

    let mut replica = alice.game().clone();
    let dave = ArenaClient::connect(server.addr, "dave@arena.dev", VERSION).await.unwrap();
    let join_tick = dave.game().tick();
    assert!(join_tick >= replica.tick());

    let mut groups = Vec::new();
    while alice.game().tick() < join_tick {
        groups.extend(alice.exchange(&idle()).await.unwrap());
    }

    for group in &groups {
        if replica.tick() == join_tick {
            break;
        }
        replica.external_step(&group.updates).unwrap();
    }
    assert_eq!(replica.tick(), join_tick);
    assert_eq!(replica.state_digest(), dave.game().state_digest());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_player_id_rejected() {
    let server = support::start_server().await;

    match ArenaClient::connect(server.addr, "not-an-email", VERSION).await {
        Err(ProtocolError::Rejected(message)) => assert!(message.contains("email"), "{}", message),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("handshake should fail"),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_version_gets_error_then_disconnected() {
    let server = support::start_server().await;
    let mut stream = support::raw_connect(server.addr).await;

    write_frame(&mut stream, br#"{"player_id":"erin@arena.dev"}"#).await.unwrap();
    let group: UpdateGroup = support::read_json(&mut stream).await;
    assert!(matches!(
        &group.updates[..],
        [Update::Error { message, .. }] if message.contains("version")
    ));
    assert_eq!(read_frame(&mut stream).await.unwrap(), DISCONNECTED_FRAME);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_garbage_handshake_rejected() {
    let server = support::start_server().await;
    let mut stream = support::raw_connect(server.addr).await;

    write_frame(&mut stream, b"hello").await.unwrap();
    let group: UpdateGroup = support::read_json(&mut stream).await;
    assert_eq!(group.updates.len(), 1);
    assert_eq!(read_frame(&mut stream).await.unwrap(), DISCONNECTED_FRAME);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let server = support::start_server().await;
    let mut stream = support::raw_connect(server.addr).await;

    let group: UpdateGroup = tokio::time::timeout(Duration::from_secs(2), support::read_json(&mut stream))
        .await
        .expect("server should give up on the handshake");
    assert!(matches!(
        &group.updates[..],
        [Update::Error { message, .. }] if message.contains("timed out")
    ));
    assert_eq!(read_frame(&mut stream).await.unwrap(), DISCONNECTED_FRAME);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let server = support::start_server().await;
    let mut first = ArenaClient::connect(server.addr, "frank@arena.dev", VERSION).await.unwrap();
    let mut second = ArenaClient::connect(server.addr, "frank@arena.dev", VERSION).await.unwrap();

    assert!(matches!(first.receive().await, Err(ProtocolError::Disconnected)));
    second.exchange(&idle()).await.unwrap();
    assert_eq!(server.server.player_count().await, 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_too_many_future_requests_disconnects() {
    let server = support::start_server().await;
    let mut client = ArenaClient::connect(server.addr, "gina@arena.dev", VERSION).await.unwrap();

    let batch = CommandBatch::with_future(None, vec![None; 11]);
    client.send(&batch).await.unwrap();
    assert!(matches!(client.receive().await, Err(ProtocolError::Disconnected)));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let server = support::start_server().await;
    let mut client = ArenaClient::connect(server.addr, "hank@arena.dev", VERSION).await.unwrap();
    client.exchange(&idle()).await.unwrap();

    server.stop().await.unwrap();
    assert!(matches!(client.receive().await, Err(ProtocolError::Disconnected)));
}
