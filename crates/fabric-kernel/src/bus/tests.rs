use super::*;
use crate::message::{BusMessage, MessagePriority};
use serde_json::json;

fn bus_with_horizon(horizon_ms: u64) -> FabricMessageBus {
    FabricMessageBus::new(
        Arc::new(MemoryStreamStore::new()),
        BusConfig::new().with_visibility_horizon(Duration::from_millis(horizon_ms)),
    )
}

#[tokio::test]
async fn send_receive_ack_round_trip() {
    let bus = FabricMessageBus::in_memory();

    let receipt = bus
        .send(BusMessage::new("coder", "percy", "task", json!({"k": 1})))
        .await
        .unwrap();
    assert_eq!(receipt.status, "queued");
    assert!(receipt.message_id.starts_with("msg:"));

    let messages = bus.receive("percy", 1, 1_000, None).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload["k"], 1);
    assert_eq!(messages[0].from_agent, "coder");
    let entry_id = messages[0].stream_entry_id.clone().unwrap();
    assert_eq!(entry_id, receipt.stream_id);

    let acked = bus
        .acknowledge("percy", &[entry_id], None)
        .await
        .unwrap();
    assert!(acked[0].acked);

    // Within the horizon, the acked message must not come back.
    let again = bus.receive("percy", 1, 100, None).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn unacked_message_redelivers_after_horizon() {
    let bus = bus_with_horizon(30);

    bus.send(BusMessage::new("a", "b", "task", json!({"job": 7})))
        .await
        .unwrap();

    let first = bus.receive("b", 1, 0, None).await.unwrap();
    assert_eq!(first.len(), 1);

    // Not acked; before the horizon nothing is redelivered.
    assert!(bus.receive("b", 1, 0, None).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = bus.receive("b", 1, 0, None).await.unwrap();
    assert_eq!(second.len(), 1, "no message loss");
    assert_eq!(second[0].message_id, first[0].message_id);
}

#[tokio::test]
async fn inbox_preserves_send_order() {
    let bus = FabricMessageBus::in_memory();
    for n in 1..=3 {
        bus.send(BusMessage::new("src", "dst", "task", json!({"n": n})))
            .await
            .unwrap();
    }
    let messages = bus.receive("dst", 10, 0, None).await.unwrap();
    let ns: Vec<i64> = messages
        .iter()
        .map(|m| m.payload["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![1, 2, 3]);
}

#[tokio::test]
async fn queue_depth_counts_unacked_sends() {
    let bus = FabricMessageBus::in_memory();
    for _ in 0..3 {
        bus.send(BusMessage::new("a", "b", "task", json!({}))).await.unwrap();
    }
    let status = bus.queue_status("b").await.unwrap();
    assert_eq!(status.agent_id, "b");
    assert!(status.queue_depth >= 3);
    assert_eq!(status.stream_info.length, 3);
}

#[tokio::test]
async fn ack_is_idempotent_and_rejects_malformed_ids() {
    let bus = FabricMessageBus::in_memory();
    bus.send(BusMessage::new("a", "b", "task", json!({})))
        .await
        .unwrap();
    let received = bus.receive("b", 1, 0, None).await.unwrap();
    let id = received[0].stream_entry_id.clone().unwrap();

    let first = bus.acknowledge("b", &[id.clone()], None).await.unwrap();
    assert!(first[0].acked);

    // Second ack of the same id: success, no side effect.
    let second = bus.acknowledge("b", &[id], None).await.unwrap();
    assert!(second[0].acked);

    // A message_id is not a stream entry id.
    let bad = bus
        .acknowledge("b", &["msg:not-an-entry".to_string()], None)
        .await
        .unwrap();
    assert!(!bad[0].acked);
}

#[tokio::test]
async fn explicit_group_is_independent_of_default() {
    let bus = FabricMessageBus::in_memory();
    bus.send(BusMessage::new("a", "b", "event", json!({"v": 1})))
        .await
        .unwrap();

    let workers = bus.receive("b", 10, 0, None).await.unwrap();
    let monitor = bus.receive("b", 10, 0, Some("monitor")).await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(monitor.len(), 1, "separate groups see the entry independently");
}

#[tokio::test]
async fn send_requires_recipient() {
    let bus = FabricMessageBus::in_memory();
    let mut m = BusMessage::new("a", "b", "task", json!({}));
    m.to_agent = None;
    let err = bus.send(m).await.unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::BadInput);
}

#[tokio::test]
async fn publish_reports_recipient_count() {
    let store = Arc::new(MemoryStreamStore::new());
    let bus = FabricMessageBus::new(store.clone(), BusConfig::default());

    assert_eq!(bus.publish("shared:alerts", json!({"sev": "high"}), Some("mon")).await.unwrap(), 0);

    let mut rx = store.subscribe("shared:alerts").await;
    let recipients = bus
        .publish("shared:alerts", json!({"sev": "low"}), Some("mon"))
        .await
        .unwrap();
    assert_eq!(recipients, 1);

    let received = rx.recv().await.unwrap();
    assert_eq!(received["data"]["sev"], "low");
    assert_eq!(received["from"], "mon");
    assert_eq!(received["topic"], "shared:alerts");
}

#[tokio::test]
async fn priority_rides_along_unchanged() {
    let bus = FabricMessageBus::in_memory();
    bus.send(
        BusMessage::new("a", "b", "task", json!({})).with_priority(MessagePriority::Critical),
    )
    .await
    .unwrap();
    let messages = bus.receive("b", 1, 0, None).await.unwrap();
    assert_eq!(messages[0].priority, MessagePriority::Critical);
}

#[tokio::test]
async fn pending_lists_delivered_unacked_entries() {
    let bus = FabricMessageBus::in_memory();
    bus.send(BusMessage::new("a", "b", "task", json!({})))
        .await
        .unwrap();
    bus.receive("b", 1, 0, None).await.unwrap();

    let pending = bus.pending("b", None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].delivery_count, 1);
}
