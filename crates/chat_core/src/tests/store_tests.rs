use super::*;
use chrono::Utc;

fn message(id: &str, sender: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: MessageId::from(id),
        content: content.to_string(),
        sender_id: UserId::from(sender),
        sender_name: sender.to_string(),
        timestamp: Utc::now(),
        read: false,
    }
}

#[test]
fn append_keeps_arrival_order() {
    let mut store = MessageStore::new(UserId::from("me"));
    assert!(store.append(message("1", "me", "first")));
    assert!(store.append(message("2", "other", "second")));
    assert!(store.append(message("3", "me", "third")));

    let contents: Vec<_> = store.snapshot().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[test]
fn append_ignores_a_repeated_id() {
    let mut store = MessageStore::new(UserId::from("me"));
    assert!(store.append(message("1", "me", "original")));
    assert!(!store.append(message("1", "me", "replayed")));

    assert_eq!(store.len(), 1);
    assert_eq!(store.snapshot()[0].content, "original");
    assert!(store.contains(&MessageId::from("1")));
}

#[test]
fn extend_counts_only_new_messages() {
    let mut store = MessageStore::new(UserId::from("me"));
    store.append(message("1", "me", "a"));
    let added = store.extend(vec![
        message("1", "me", "a"),
        message("2", "other", "b"),
        message("2", "other", "b"),
    ]);
    assert_eq!(added, 1);
    assert_eq!(store.len(), 2);
}

#[test]
fn mark_own_as_read_only_touches_local_messages() {
    let mut store = MessageStore::new(UserId::from("me"));
    store.extend(vec![
        message("1", "me", "mine"),
        message("2", "other", "theirs"),
        message("3", "me", "mine again"),
    ]);

    assert_eq!(store.mark_own_as_read(), 2);
    let read: Vec<_> = store.snapshot().into_iter().map(|m| m.read).collect();
    assert_eq!(read, vec![true, false, true]);

    assert_eq!(store.mark_own_as_read(), 0);
}

#[test]
fn rename_sender_updates_every_matching_entry() {
    let mut store = MessageStore::new(UserId::from("me"));
    store.extend(vec![
        message("1", "9", "hi"),
        message("2", "me", "hello"),
        message("3", "9", "bye"),
    ]);

    assert_eq!(store.rename_sender(&UserId::from("9"), "Bori"), 2);
    assert_eq!(store.rename_sender(&UserId::from("9"), "Bori"), 0);
    let names: Vec<_> = store.snapshot().into_iter().map(|m| m.sender_name).collect();
    assert_eq!(names, vec!["Bori", "me", "Bori"]);
}

#[test]
fn clear_forgets_ids() {
    let mut store = MessageStore::new(UserId::from("me"));
    store.append(message("1", "me", "a"));
    store.clear();
    assert!(store.is_empty());
    assert!(store.append(message("1", "me", "a")));
}
