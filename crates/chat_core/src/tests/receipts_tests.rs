use super::*;
use crate::{
    connection::{ConnectionManager, ReconnectPolicy},
    test_support::FakeBroker,
};
use chrono::Utc;
use shared::domain::MessageId;

fn message(id: &str, sender: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::from(id),
        content: "hello".into(),
        sender_id: UserId::from(sender),
        sender_name: String::new(),
        timestamp: Utc::now(),
        read: false,
    }
}

async fn connected(broker: &FakeBroker) -> ConnectionManager {
    let mut connection = ConnectionManager::new(
        broker.connector(),
        FakeBroker::endpoint(),
        ReconnectPolicy::default(),
    );
    connection.connect().await.expect("connect");
    connection
}

#[tokio::test]
async fn counterpart_message_sends_room_ack() {
    let broker = FakeBroker::new();
    let mut connection = connected(&broker).await;
    let reconciler = ReadReceiptReconciler::new(RoomId::from("42"), UserId::from("5"));

    let acked = reconciler
        .on_message(&message("1", "9"), &mut connection)
        .await
        .expect("ack");

    assert!(acked);
    let acks = broker.published_to("/pub/api/v1/chat/read/42");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].get("userId"), Some("5"));
    assert_eq!(acks[0].body, "{}");
}

#[tokio::test]
async fn own_message_is_not_acknowledged() {
    let broker = FakeBroker::new();
    let mut connection = connected(&broker).await;
    let reconciler = ReadReceiptReconciler::new(RoomId::from("42"), UserId::from("5"));

    let acked = reconciler
        .on_message(&message("1", "5"), &mut connection)
        .await
        .expect("no ack");

    assert!(!acked);
    assert!(broker.published_to(reconciler.ack_destination()).is_empty());
}

#[test]
fn read_signal_marks_only_own_messages() {
    let reconciler = ReadReceiptReconciler::new(RoomId::from("42"), UserId::from("5"));
    let mut store = MessageStore::new(UserId::from("5"));
    store.extend(vec![message("1", "5"), message("2", "9"), message("3", "5")]);

    assert_eq!(reconciler.on_read_signal(&mut store), 2);
    assert_eq!(reconciler.on_read_signal(&mut store), 0);
    assert!(!store.snapshot()[1].read);
}
