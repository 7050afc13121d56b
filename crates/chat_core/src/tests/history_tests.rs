use super::*;
use serde_json::{json, Value};

struct FixedHistory(Vec<Value>);

#[async_trait]
impl HistorySource for FixedHistory {
    async fn fetch_history(
        &self,
        _room_id: &RoomId,
        _auth_token: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .0
            .iter()
            .cloned()
            .map(|value| serde_json::from_value(value).expect("entry"))
            .collect())
    }
}

struct DeniedHistory;

#[async_trait]
impl HistorySource for DeniedHistory {
    async fn fetch_history(
        &self,
        room_id: &RoomId,
        _auth_token: Option<&str>,
    ) -> Result<Vec<HistoryEntry>> {
        Err(ChatError::Authorization {
            room_id: room_id.clone(),
        })
    }
}

fn loader(source: impl HistorySource + 'static) -> HistoryLoader {
    HistoryLoader::new(Arc::new(source), "Me", "Unknown user")
}

#[tokio::test]
async fn own_messages_only_leave_counterpart_unknown() {
    let loader = loader(FixedHistory(vec![
        json!({ "id": 1, "senderId": 5, "content": "anyone?" }),
        json!({ "id": 2, "senderId": "5", "content": "hello?" }),
    ]));
    let identity = LocalIdentity::new("5").with_nickname("Dana");

    let loaded = loader.load(&RoomId::from("42"), &identity).await.expect("load");

    assert!(loaded.counterpart_id.is_empty());
    assert_eq!(loaded.messages.len(), 2);
    assert!(loaded.messages.iter().all(|m| m.sender_name == "Dana"));
}

#[tokio::test]
async fn first_foreign_sender_becomes_counterpart() {
    let loader = loader(FixedHistory(vec![
        json!({ "id": 1, "senderId": 5, "content": "found your dog" }),
        json!({ "id": 2, "senderId": 9, "content": "thank you!", "isRead": true }),
        json!({ "id": 3, "senderId": 11, "content": "stray entry" }),
    ]));
    let identity = LocalIdentity::new("5");

    let loaded = loader.load(&RoomId::from("42"), &identity).await.expect("load");

    assert_eq!(loaded.counterpart_id, UserId::from("9"));
    let names: Vec<_> = loaded.messages.iter().map(|m| m.sender_name.as_str()).collect();
    assert_eq!(names, vec!["Me", "Unknown user", "Unknown user"]);
    assert!(loaded.messages[1].read);
    assert!(!loaded.messages[0].read);
}

#[tokio::test]
async fn empty_history_is_not_an_error() {
    let loaded = loader(FixedHistory(Vec::new()))
        .load(&RoomId::from("42"), &LocalIdentity::new("5"))
        .await
        .expect("load");
    assert!(loaded.messages.is_empty());
    assert!(loaded.counterpart_id.is_empty());
}

#[tokio::test]
async fn denied_room_propagates_authorization_error() {
    let err = loader(DeniedHistory)
        .load(&RoomId::from("42"), &LocalIdentity::new("5"))
        .await
        .expect_err("denied");
    assert!(err.is_authorization());
}
