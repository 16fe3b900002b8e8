//! Peer churn: joins, leaves, and disconnects racing in-flight messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use trellis_core::payload::{self, Payload};
use trellis_core::wire::{self, ActionId};
use trellis_core::RoomConfig;
use trellis_room::{memory_channel_pair, MemoryHub, Room};

use crate::{join, wait_for, TEST_APP};

#[tokio::test]
async fn join_and_leave_callbacks_fire_exactly_once() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);

    let joins = Arc::new(AtomicUsize::new(0));
    let leaves = Arc::new(AtomicUsize::new(0));
    {
        let joins = joins.clone();
        room_a.on_peer_join(move |peer_id| {
            assert_eq!(peer_id, "B");
            joins.fetch_add(1, Ordering::Relaxed);
        });
        let leaves = leaves.clone();
        room_a.on_peer_leave(move |peer_id| {
            assert_eq!(peer_id, "B");
            leaves.fetch_add(1, Ordering::Relaxed);
        });
    }

    let room_b = join(&hub, "lobby", "B", None);
    wait_for("join", || joins.load(Ordering::Relaxed) == 1).await;

    room_b.leave();
    wait_for("leave", || leaves.load(Ordering::Relaxed) == 1).await;

    // Nothing fires twice.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(joins.load(Ordering::Relaxed), 1);
    assert_eq!(leaves.load(Ordering::Relaxed), 1);
    assert!(room_a.peer_ids().is_empty());
}

#[tokio::test]
async fn peer_teardown_mid_transmission_discards_the_partial_message() {
    let room = Room::new(RoomConfig::new(TEST_APP, "churny"));
    let (local, _remote) = memory_channel_pair(16);
    let (feed_tx, feed_rx) = mpsc::channel(16);
    room.attach_peer("B", local.channel, feed_rx);

    let (_sender, receiver) = room.make_action("blob").unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = delivered.clone();
        receiver.on(move |_, _, _| {
            delivered.fetch_add(1, Ordering::Relaxed);
        });
    }

    let action = ActionId::new("blob").unwrap();
    let body = payload::encode(&Payload::from(vec![5u8; 200]), None).unwrap();
    let frames = wire::encode_chunks(action, 0, &body, 64).unwrap();
    assert!(frames.len() > 2);

    // First chunk arrives, then the peer disconnects mid-transmission.
    feed_tx.send(frames[0].clone()).await.unwrap();
    drop(feed_tx);
    wait_for("peer removal", || room.peer_ids().is_empty()).await;

    // The rest of the message races in after teardown: silent no-op.
    for frame in &frames[1..] {
        room.handle_data("B", frame);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(delivered.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn remote_leave_is_observed_as_departure() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    room_b.leave();
    wait_for("A drops B", || room_a.peer_ids().is_empty()).await;
}

#[tokio::test]
async fn messages_before_departure_still_deliver() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    let (_send_a, recv_a) = room_a.make_action("bye").unwrap();
    let (send_b, _recv_b) = room_b.make_action("bye").unwrap();

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    recv_a.on(move |payload, _, _| {
        let _ = observed_tx.send(payload);
    });

    send_b.send("parting words").await.unwrap();
    assert_eq!(
        observed_rx.recv().await.unwrap(),
        Payload::Text("parting words".into())
    );
    room_b.leave();
    wait_for("A drops B", || room_a.peer_ids().is_empty()).await;
}

#[tokio::test]
async fn large_message_survives_a_tiny_transport_queue() {
    // Capacity 1 keeps at most one frame in flight per direction, so the
    // sender has to ride the backpressure path the whole way.
    let hub = MemoryHub::with_capacity(1);
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    let (_send_a, recv_a) = room_a.make_action("bulk").unwrap();
    let (send_b, _recv_b) = room_b.make_action("bulk").unwrap();

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    recv_a.on(move |payload, _, _| {
        let _ = observed_tx.send(payload);
    });

    let big: Vec<u8> = (0..500_000u32).map(|i| (i % 256) as u8).collect();
    send_b.send(big.clone()).await.unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), observed_rx.recv())
        .await
        .expect("delivery should finish despite backpressure")
        .unwrap();
    assert_eq!(payload, Payload::Binary(bytes::Bytes::from(big)));
}
