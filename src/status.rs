use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named metrics reported by the device. Either transport may deliver only a
/// subset of fields; absent fields keep their previous value downstream.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LiveStatusSnapshot(Map<String, Value>);

impl LiveStatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot from a fetched payload. Anything but an object carries no fields.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overwrite every field `other` carries, keep the rest
    pub fn merge_from(&mut self, other: &LiveStatusSnapshot) {
        for (key, value) in other.fields() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn free_heap(&self) -> Option<u64> {
        self.get("freeHeap").and_then(Value::as_u64)
    }

    pub fn wifi_rssi(&self) -> Option<i64> {
        self.get("wifiRSSI").and_then(Value::as_i64)
    }

    pub fn uptime(&self) -> Option<u64> {
        self.get("uptime").and_then(Value::as_u64)
    }

    pub fn just_connected(&self) -> bool {
        self.get("justConnected")
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }

    /// Addresses to show after the device switched networks
    pub fn network_transition(&self) -> Option<NetworkTransition> {
        if !self.just_connected() {
            return None;
        }

        Some(NetworkTransition {
            sta_ssid: self.text_or("staSSID", "Unknown WiFi"),
            sta_ip: self.text_or("ipSTA", "0.0.0.0"),
            ap_ssid: self.text_or("apSSID", "Unknown WiFi"),
            ap_ip: self.text_or("ipAP", "192.168.4.1"),
            hostname: self.text_or("hostname", "kbWinder.local"),
        })
    }

    fn text_or(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

impl From<Map<String, Value>> for LiveStatusSnapshot {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The device just joined a station network while its access point is still up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkTransition {
    pub sta_ssid: String,
    pub sta_ip: String,
    pub ap_ssid: String,
    pub ap_ip: String,
    pub hostname: String,
}

pub fn format_uptime(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h}h {m}m {s}s")
}

/// Pull `[CATEGORY] KEY: VALUE` fields out of a device log message.
///
/// One field per line at most. Spaces in the key become underscores so the
/// key can be used as a snapshot field name.
pub fn scan_log_fields(message: &str) -> Vec<(String, String)> {
    message.lines().filter_map(scan_line).collect()
}

fn scan_line(line: &str) -> Option<(String, String)> {
    let mut search = line;

    // the bracket need not start the line, try every '[' in turn
    while let Some(open) = search.find('[') {
        let rest = &search[open + 1..];
        if let Some(field) = parse_tagged(rest) {
            return Some(field);
        }
        search = rest;
    }

    None
}

fn parse_tagged(rest: &str) -> Option<(String, String)> {
    let close = rest.find(']')?;
    let category = &rest[..close];
    if category.is_empty() || !category.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let after = &rest[close + 1..];
    let trimmed = after.trim_start();
    if trimmed.len() == after.len() {
        return None;
    }

    let colon = trimmed.find(':')?;
    let key = trimmed[..colon].trim();
    let value_part = &trimmed[colon + 1..];
    let value = value_part.trim();

    if key.is_empty() || value.is_empty() || value_part.trim_start().len() == value_part.len() {
        return None;
    }

    Some((key.replace(' ', "_"), value.to_string()))
}
