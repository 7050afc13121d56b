use super::*;
use std::collections::HashMap;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn defaults_are_valid() {
    let settings = ChatSettings::default();
    settings.validate().expect("defaults validate");
    assert_eq!(settings.read_receipt_destinations.len(), 6);
    assert_eq!(settings.reconnect.max_attempts, 5);
}

#[test]
fn file_values_override_defaults() {
    let mut settings = ChatSettings::default();
    apply_file(
        &mut settings,
        r#"
api_base_url = "https://pets.example/api/v1"
ws_endpoint = "https://pets.example/ws-stomp"
request_timeout_secs = 3
reconnect_max_attempts = 2
reconnect_initial_delay_ms = 250
reconnect_stable_after_ms = 1500
read_receipt_destinations = ["/sub/chat/{room_id}/read", "/topic/read/{room_id}"]
"#,
    );

    assert_eq!(settings.api_base_url, "https://pets.example/api/v1");
    assert_eq!(settings.request_timeout, Duration::from_secs(3));
    assert_eq!(settings.reconnect.max_attempts, 2);
    assert_eq!(settings.reconnect.initial_delay, Duration::from_millis(250));
    assert_eq!(settings.reconnect.stable_after, Duration::from_millis(1500));
    assert_eq!(
        settings.read_receipt_destinations,
        vec!["/sub/chat/{room_id}/read", "/topic/read/{room_id}"]
    );
    assert_eq!(
        settings.ws_url().expect("ws url").as_str(),
        "wss://pets.example/ws-stomp"
    );
}

#[test]
fn unparseable_file_is_ignored() {
    let mut settings = ChatSettings::default();
    apply_file(&mut settings, "this is = = not toml");
    assert_eq!(settings, ChatSettings::default());
}

#[test]
fn app_prefixed_env_wins_over_chat_prefix() {
    let mut settings = ChatSettings::default();
    apply_env(
        &mut settings,
        env(&[
            ("APP__COUNTERPART_PLACEHOLDER", "상대방"),
            ("CHAT_COUNTERPART_PLACEHOLDER", "ignored"),
            ("CHAT_SHUTDOWN_TIMEOUT_MS", "50"),
        ]),
    );
    assert_eq!(settings.counterpart_placeholder, "상대방");
    assert_eq!(settings.shutdown_timeout, Duration::from_millis(50));
}

#[test]
fn non_numeric_values_keep_previous_setting() {
    let mut settings = ChatSettings::default();
    apply_env(
        &mut settings,
        env(&[("CHAT_RECONNECT_MAX_ATTEMPTS", "lots")]),
    );
    assert_eq!(settings.reconnect.max_attempts, 5);
}

#[test]
fn validate_rejects_broken_settings() {
    let mut settings = ChatSettings {
        ws_endpoint: "ftp://pets.example/ws".into(),
        ..ChatSettings::default()
    };
    assert!(matches!(settings.validate(), Err(ChatError::Config(_))));

    settings = ChatSettings::default();
    settings.reconnect.max_attempts = 0;
    assert!(matches!(settings.validate(), Err(ChatError::Config(_))));

    settings = ChatSettings {
        read_receipt_destinations: Vec::new(),
        ..ChatSettings::default()
    };
    assert!(matches!(settings.validate(), Err(ChatError::Config(_))));
}

#[test]
fn websocket_url_maps_http_schemes() {
    assert_eq!(
        websocket_url("http://localhost:8080/ws").expect("url"),
        "ws://localhost:8080/ws"
    );
    assert_eq!(
        websocket_url("wss://pets.example/ws").expect("url"),
        "wss://pets.example/ws"
    );
    assert!(websocket_url("localhost:8080").is_err());
}

#[test]
fn missing_settings_file_falls_back_to_defaults() {
    let path = std::env::temp_dir().join("chat-settings-that-do-not-exist.toml");
    let settings = load_settings_from(&path);
    assert!(settings.validate().is_ok());
}
