//! Cross-component integration tests
//!
//! These tests drive the registry, room table and relay together with
//! in-memory outbound queues, without a server or Redis.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use room_relay::connection_manager::{ConnectionHandle, ConnectionId, Registry, RoomTable};
use room_relay::fanout::LocalFanout;
use room_relay::relay::Relay;
use room_relay::websocket::{dispatch, teardown, InboundFrame, OutboundMessage, ServerMessage};

fn create_relay(send_timeout: Duration) -> Arc<Relay> {
    Arc::new(Relay::new(
        Arc::new(Registry::new()),
        Arc::new(RoomTable::with_rooms(["general", "support", "random"])),
        Arc::new(LocalFanout::new("test-instance")),
        send_timeout,
        "general",
    ))
}

struct Client {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<OutboundMessage>,
}

impl Client {
    fn connect(relay: &Relay, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = relay.registry().register(tx);
        assert!(handle.mark_open());
        Self { handle, rx }
    }

    fn id(&self) -> ConnectionId {
        self.handle.id
    }

    fn drain(&mut self) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let Some(Ok(text)) = msg.to_json() {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }
}

/// Every member of every room is registered and assigned to that room
fn assert_no_dangling_membership(relay: &Relay) {
    for info in relay.rooms().rooms() {
        for id in relay.rooms().members(&info.name) {
            assert!(
                relay.registry().contains(id),
                "{} in room {} is not registered",
                id,
                info.name
            );
            assert_eq!(relay.rooms().room_of(id).as_deref(), Some(info.name.as_str()));
        }
    }
}

#[tokio::test]
async fn test_registry_ids_are_unique_under_concurrency() {
    let relay = create_relay(Duration::from_millis(100));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            (0..50)
                .map(|_| {
                    let (tx, _rx) = mpsc::channel(1);
                    relay.registry().register(tx).id
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(ids.insert(id), "duplicate id {}", id);
        }
    }
    assert_eq!(ids.len(), 800);
    assert_eq!(relay.registry().len(), 800);
}

#[tokio::test]
async fn test_connection_is_in_at_most_one_room() {
    let relay = create_relay(Duration::from_millis(100));
    let mut client = Client::connect(&relay, 64);

    for room in ["general", "support", "random", "support", "lobby"] {
        dispatch(&relay, &client.handle, InboundFrame::Join { room: Some(room.into()) }).await;
    }

    let rooms_containing: Vec<String> = relay
        .rooms()
        .rooms()
        .into_iter()
        .filter(|info| relay.rooms().members(&info.name).contains(&client.id()))
        .map(|info| info.name)
        .collect();
    assert_eq!(rooms_containing, vec!["lobby".to_string()]);

    // Lazily created room persists
    assert!(relay.rooms().contains_room("lobby"));
    client.drain();
}

#[tokio::test]
async fn test_concurrent_joins_and_disconnects_leave_no_dangling_members() {
    let relay = create_relay(Duration::from_millis(100));
    let rooms = ["general", "support", "random"];

    let mut tasks = Vec::new();
    for i in 0..40 {
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(&relay, 1024);
            for step in 0..5 {
                let room = rooms[(i + step) % rooms.len()];
                dispatch(&relay, &client.handle, InboundFrame::Join { room: Some(room.into()) })
                    .await;
                tokio::task::yield_now().await;
            }
            if i % 2 == 0 {
                teardown(&relay, &client.handle).await;
            }
            client.drain();
            client
        }));
    }

    let mut survivors = Vec::new();
    for task in tasks {
        survivors.push(task.await.unwrap());
    }

    assert_no_dangling_membership(&relay);
    assert_eq!(relay.registry().len(), 20);
    assert_eq!(relay.rooms().assigned_count(), 20);
    drop(survivors);
}

#[tokio::test]
async fn test_failed_recipient_does_not_block_others() {
    let relay = create_relay(Duration::from_millis(50));
    let mut sender = Client::connect(&relay, 64);
    let mut healthy = Client::connect(&relay, 64);
    let dead = Client::connect(&relay, 64);

    for client in [&sender, &healthy, &dead] {
        dispatch(&relay, &client.handle, InboundFrame::Join { room: None }).await;
    }
    sender.drain();
    healthy.drain();

    // Dropping the receiver closes the dead client's queue
    let dead_id = dead.id();
    drop(dead.rx);

    let report = relay
        .broadcast("general", &ServerMessage::chat(sender.id(), "still here?"), None)
        .await;

    assert_eq!(report.evicted, vec![dead_id]);
    assert!(!relay.registry().contains(dead_id));
    assert_no_dangling_membership(&relay);

    let frames = healthy.drain();
    assert_eq!(frames[0]["content"], "still here?");
    assert_eq!(frames[1]["type"], "user_left");
    assert_eq!(frames[1]["userId"], dead_id.to_string());
    assert_eq!(sender.drain().len(), 2);
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let relay = create_relay(Duration::from_millis(100));
    let client = Client::connect(&relay, 8);
    let id = client.id();

    assert!(relay.registry().unregister(id).is_some());
    assert!(relay.registry().unregister(id).is_none());
    assert!(relay.registry().unregister(ConnectionId::new()).is_none());
    assert!(relay.registry().is_empty());
}

#[tokio::test]
async fn test_broadcast_to_empty_room_sends_nothing() {
    let relay = create_relay(Duration::from_millis(100));
    let mut bystander = Client::connect(&relay, 8);
    dispatch(&relay, &bystander.handle, InboundFrame::Join { room: Some("support".into()) })
        .await;
    bystander.drain();

    let report = relay
        .broadcast("random", &ServerMessage::echo("into the void"), None)
        .await;

    assert_eq!(report.recipients, 0);
    assert_eq!(report.delivered, 0);
    assert!(report.evicted.is_empty());
    assert!(bystander.drain().is_empty());
    assert_eq!(relay.registry().len(), 1);
}
