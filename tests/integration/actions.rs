//! Action exchange between meshed rooms.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::mpsc;

use trellis_core::Payload;
use trellis_room::{MemoryHub, RoomError};

use crate::{join, wait_for};

#[tokio::test]
async fn ping_is_delivered_exactly_once_with_sender_id() -> Result<()> {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    let (_send_a, recv_a) = room_a.make_action("ping")?;
    let (send_b, _recv_b) = room_b.make_action("ping")?;

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    recv_a.on(move |payload, peer_id, meta| {
        let _ = observed_tx.send((payload, peer_id.to_string(), meta.cloned()));
    });

    send_b.send(json!({"n": 42})).await?;

    let (payload, peer_id, meta) = observed_rx
        .recv()
        .await
        .context("receiver saw no delivery")?;
    assert_eq!(payload, Payload::Structured(json!({"n": 42})));
    assert_eq!(peer_id, "B");
    assert_eq!(meta, None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed_rx.try_recv().is_err(), "delivered exactly once");
    Ok(())
}

#[tokio::test]
async fn every_payload_kind_round_trips() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    let (_send_a, recv_a) = room_a.make_action("mixed").unwrap();
    let (send_b, _recv_b) = room_b.make_action("mixed").unwrap();

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    recv_a.on(move |payload, _, _| {
        let _ = observed_tx.send(payload);
    });

    send_b.send("plain text").await.unwrap();
    send_b.send(json!(["a", 1, null])).await.unwrap();
    send_b.send(vec![0u8, 127, 255]).await.unwrap();

    assert_eq!(observed_rx.recv().await.unwrap(), Payload::Text("plain text".into()));
    assert_eq!(
        observed_rx.recv().await.unwrap(),
        Payload::Structured(json!(["a", 1, null]))
    );
    assert_eq!(
        observed_rx.recv().await.unwrap(),
        Payload::Binary(bytes::Bytes::from(vec![0u8, 127, 255]))
    );
}

#[tokio::test]
async fn payload_larger_than_one_frame_reassembles() {
    let hub = MemoryHub::new();
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

    // Well past the 16 KiB default frame size: many chunks per message.
    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    send_b.send(big.clone()).await.unwrap();

    let payload = observed_rx.recv().await.unwrap();
    assert_eq!(payload, Payload::Binary(bytes::Bytes::from(big)));
}

#[tokio::test]
async fn messages_of_one_action_arrive_in_send_order() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    let (_send_a, recv_a) = room_a.make_action("seq").unwrap();
    let (send_b, _recv_b) = room_b.make_action("seq").unwrap();

    let (observed_tx, mut observed_rx) = mpsc::unbounded_channel();
    recv_a.on(move |payload, _, _| {
        let _ = observed_tx.send(payload);
    });

    for n in 0..30 {
        send_b.send(json!({"seq": n})).await.unwrap();
    }
    for n in 0..30 {
        assert_eq!(
            observed_rx.recv().await.unwrap(),
            Payload::Structured(json!({"seq": n}))
        );
    }
}

#[tokio::test]
async fn targeted_send_reaches_only_the_named_peer() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    let room_c = join(&hub, "lobby", "C", None);
    wait_for("full mesh", || {
        room_a.peer_ids().len() == 2 && room_b.peer_ids().len() == 2 && room_c.peer_ids().len() == 2
    })
    .await;

    let (_sa, recv_a) = room_a.make_action("whisper").unwrap();
    let (_sb, recv_b) = room_b.make_action("whisper").unwrap();
    let (send_c, _rc) = room_c.make_action("whisper").unwrap();

    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    recv_a.on(move |payload, _, _| {
        let _ = a_tx.send(payload);
    });
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    recv_b.on(move |payload, _, _| {
        let _ = b_tx.send(payload);
    });

    send_c.send_to("for A only", "A").await.unwrap();

    assert_eq!(a_rx.recv().await.unwrap(), Payload::Text("for A only".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b_rx.try_recv().is_err(), "B must not observe a targeted send");
}

#[tokio::test]
async fn validation_errors_are_synchronous_and_typed() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    // Action type bounds.
    assert!(room_a.make_action("").is_err());
    assert!(room_a.make_action("far-too-long-type").is_err());

    // Metadata with a non-binary payload.
    let (send_b, _recv_b) = room_b.make_action("strict").unwrap();
    let result = send_b
        .send_with_meta("not binary", "A", json!({"tag": "x"}))
        .await;
    assert!(matches!(
        result,
        Err(RoomError::Payload(
            trellis_core::payload::PayloadError::MetaWithNonBinary
        ))
    ));
}

#[tokio::test]
async fn progress_callbacks_observe_multi_chunk_receive() {
    let hub = MemoryHub::new();
    let room_a = join(&hub, "lobby", "A", None);
    let room_b = join(&hub, "lobby", "B", None);
    wait_for("mesh", || {
        !room_a.peer_ids().is_empty() && !room_b.peer_ids().is_empty()
    })
    .await;

    let (_send_a, recv_a) = room_a.make_action("file").unwrap();
    let (send_b, _recv_b) = room_b.make_action("file").unwrap();

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    recv_a.on_progress(move |fraction, peer_id| {
        let _ = progress_tx.send((fraction, peer_id.to_string()));
    });
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    recv_a.on(move |_, _, _| {
        let _ = done_tx.send(());
    });

    send_b.send(vec![7u8; 100_000]).await.unwrap();
    done_rx.recv().await.unwrap();

    let mut last = 0.0f32;
    let mut updates = 0;
    while let Ok((fraction, peer_id)) = progress_rx.try_recv() {
        assert_eq!(peer_id, "B");
        assert!(fraction >= last, "progress must not move backwards");
        last = fraction;
        updates += 1;
    }
    assert!(updates > 1, "a multi-chunk message reports progress per chunk");
    assert!((last - 1.0).abs() < f32::EPSILON);
}
