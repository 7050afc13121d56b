use std::{fs, path::Path, time::Duration};

use tracing::warn;
use url::Url;

use crate::{
    connection::ReconnectPolicy,
    error::{ChatError, Result},
    subscriptions::DEFAULT_READ_RECEIPT_DESTINATIONS,
};

pub const DEFAULT_SETTINGS_FILE: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub api_base_url: String,
    pub ws_endpoint: String,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub shutdown_timeout: Duration,
    pub counterpart_placeholder: String,
    pub local_name_fallback: String,
    /// Templates with a `{room_id}` placeholder.
    pub read_receipt_destinations: Vec<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/v1".into(),
            ws_endpoint: "ws://localhost:8080/ws-stomp".into(),
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            shutdown_timeout: Duration::from_secs(1),
            counterpart_placeholder: "Unknown user".into(),
            local_name_fallback: "Me".into(),
            read_receipt_destinations: DEFAULT_READ_RECEIPT_DESTINATIONS
                .iter()
                .map(|template| (*template).to_string())
                .collect(),
        }
    }
}

impl ChatSettings {
    pub fn validate(&self) -> Result<()> {
        let api = Url::parse(&self.api_base_url)
            .map_err(|err| ChatError::Config(format!("api_base_url: {err}")))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "api_base_url must be http(s): {}",
                self.api_base_url
            )));
        }
        self.ws_url()?;
        if self.read_receipt_destinations.is_empty() {
            return Err(ChatError::Config(
                "at least one read receipt destination is required".into(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ChatError::Config(
                "reconnect_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn ws_url(&self) -> Result<Url> {
        let url = Url::parse(&websocket_url(&self.ws_endpoint)?)
            .map_err(|err| ChatError::Config(format!("ws_endpoint: {err}")))?;
        Ok(url)
    }
}

/// Accepts `ws(s)://` as-is and maps `http(s)://` onto the matching WebSocket scheme.
pub fn websocket_url(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        Ok(endpoint.to_string())
    } else if endpoint.starts_with("https://") {
        Ok(endpoint.replacen("https://", "wss://", 1))
    } else if endpoint.starts_with("http://") {
        Ok(endpoint.replacen("http://", "ws://", 1))
    } else {
        Err(ChatError::Config(format!(
            "ws_endpoint must start with ws(s):// or http(s)://: {endpoint}"
        )))
    }
}

/// Defaults, then `chat.toml` in the working directory, then the environment.
pub fn load_settings() -> ChatSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> ChatSettings {
    let mut settings = ChatSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |name| std::env::var(name).ok());

    settings
}

pub(crate) fn apply_file(settings: &mut ChatSettings, raw: &str) {
    let table = match raw.parse::<toml::Table>() {
        Ok(table) => table,
        Err(err) => {
            warn!(%err, "ignoring unparseable chat settings file");
            return;
        }
    };
    apply_values(settings, |key| table.get(key).and_then(toml_value_as_string));
}

pub(crate) fn apply_env(settings: &mut ChatSettings, lookup: impl Fn(&str) -> Option<String>) {
    apply_values(settings, |key| {
        let upper = key.to_ascii_uppercase();
        lookup(&format!("APP__{upper}")).or_else(|| lookup(&format!("CHAT_{upper}")))
    });
}

fn apply_values(settings: &mut ChatSettings, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("api_base_url") {
        settings.api_base_url = v;
    }
    if let Some(v) = get("ws_endpoint") {
        settings.ws_endpoint = v;
    }
    if let Some(v) = get("counterpart_placeholder") {
        settings.counterpart_placeholder = v;
    }
    if let Some(v) = get("local_name_fallback") {
        settings.local_name_fallback = v;
    }
    if let Some(v) = get("read_receipt_destinations") {
        let templates: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|template| !template.is_empty())
            .map(str::to_string)
            .collect();
        if !templates.is_empty() {
            settings.read_receipt_destinations = templates;
        }
    }

    if let Some(secs) = parse_number::<u64>(&get, "request_timeout_secs") {
        settings.request_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = parse_number::<u64>(&get, "shutdown_timeout_ms") {
        settings.shutdown_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_number::<u64>(&get, "reconnect_initial_delay_ms") {
        settings.reconnect.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_number::<u64>(&get, "reconnect_max_delay_ms") {
        settings.reconnect.max_delay = Duration::from_millis(ms);
    }
    if let Some(factor) = parse_number::<u32>(&get, "reconnect_multiplier") {
        settings.reconnect.multiplier = factor;
    }
    if let Some(attempts) = parse_number::<u32>(&get, "reconnect_max_attempts") {
        settings.reconnect.max_attempts = attempts;
    }
    if let Some(ms) = parse_number::<u64>(&get, "reconnect_stable_after_ms") {
        settings.reconnect.stable_after = Duration::from_millis(ms);
    }
}

fn parse_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %raw, "ignoring non-numeric chat setting");
            None
        }
    }
}

fn toml_value_as_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(v) => Some(v.clone()),
        toml::Value::Integer(v) => Some(v.to_string()),
        toml::Value::Float(v) => Some(v.to_string()),
        toml::Value::Boolean(v) => Some(v.to_string()),
        toml::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(toml_value_as_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
