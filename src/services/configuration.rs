//! Device configuration document
//!
//! One in-memory copy per session. Loading merges the device's sections into
//! it; uploading strips every secret still holding the mask so the device
//! keeps the value it already has.

use crate::{
    device::DeviceClient,
    fetcher::{FetchOptions, MultiSourceFetcher},
    http_client::HttpTransport,
    services::notification::{NotificationCenter, NotificationKind},
    session::Session,
    view::{ConfigView, NotificationView},
};
use anyhow::{Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder the device sends instead of a stored secret
pub const SECRET_MASK: &str = "********";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigurationDocument(Map<String, Value>);

impl ConfigurationDocument {
    pub const SECTIONS: [&str; 6] = ["system", "network", "security", "ui", "meta", "info"];

    /// Document with every known section present and empty
    pub fn with_sections() -> Self {
        let mut sections = Map::new();
        for name in Self::SECTIONS {
            sections.insert(name.to_string(), Value::Object(Map::new()));
        }
        Self(sections)
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(sections) => Self(sections),
            _ => Self::default(),
        }
    }

    /// Merge a fetched document section by section. Sections missing locally
    /// are created, fields the remote does not carry are kept.
    pub fn merge(&mut self, remote: &Value) {
        let Value::Object(sections) = remote else {
            warn!("ignoring configuration that is not an object");
            return;
        };

        for (name, data) in sections {
            match (self.0.get_mut(name), data) {
                (Some(Value::Object(local)), Value::Object(fields)) => {
                    for (key, value) in fields {
                        local.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    self.0.insert(name.clone(), data.clone());
                }
            }
        }
    }

    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name).and_then(Value::as_object)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.section(section).and_then(|fields| fields.get(key))
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        let entry = self
            .0
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        if let Value::Object(fields) = entry {
            fields.insert(key.to_string(), value);
        }
    }

    /// Whether the status poll should run next to the push channel
    pub fn web_status_update(&self) -> bool {
        self.get("system", "webStatusUpdate")
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }

    pub fn installed_version(&self) -> Option<&str> {
        self.get("info", "version").and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Deep copy without any value equal to the secret mask, at any depth
    pub fn prepare_upload(&self) -> Value {
        let mut copy = self.to_value();
        strip_masked(&mut copy);
        copy
    }
}

fn is_mask(value: &Value) -> bool {
    value.as_str() == Some(SECRET_MASK)
}

fn strip_masked(value: &mut Value) {
    match value {
        Value::Object(fields) => {
            fields.retain(|_, v| !is_mask(v));
            fields.values_mut().for_each(strip_masked);
        }
        // array positions are meaningful, a masked element keeps its slot
        Value::Array(items) => items.iter_mut().for_each(|item| {
            if is_mask(item) {
                *item = Value::Null;
            } else {
                strip_masked(item);
            }
        }),
        _ => {}
    }
}

/// Loading and saving the session's configuration
pub struct ConfigurationService;

impl ConfigurationService {
    /// Fetch the device configuration, merge it and render it
    ///
    /// # Arguments
    /// * `fetcher` - resolver used for the candidates
    /// * `candidates` - configuration endpoints in fallback order
    /// * `session` - owner of the configuration document
    /// * `view` - receives the merged document
    ///
    /// # Returns
    /// `true` if the device answered. Otherwise the defaults are rendered.
    pub async fn load<T: HttpTransport, V: ConfigView>(
        fetcher: &MultiSourceFetcher<T>,
        candidates: &[String],
        session: &Session,
        view: &V,
    ) -> bool {
        let loaded = match fetcher.fetch(candidates, &FetchOptions::default()).await {
            Some(remote) => {
                session.update_configuration(|doc| doc.merge(&remote));
                info!("configuration loaded");
                true
            }
            None => {
                warn!("configuration unavailable, keeping defaults");
                false
            }
        };

        view.render_config(&session.configuration().to_value());
        loaded
    }

    /// Upload the session's configuration without unchanged secrets
    ///
    /// The outcome is always shown as a notification. There is no automatic
    /// retry, the error is returned so the caller can offer one.
    pub async fn upload<T: HttpTransport, N: NotificationView>(
        client: &DeviceClient<T>,
        session: &Session,
        notifications: &NotificationCenter<N>,
    ) -> Result<()> {
        let values = session.configuration().prepare_upload();
        debug!("uploading configuration: {values}");

        match client.upload_configuration(values).await {
            Ok(res) if res.is_success() => {
                notifications.show(
                    NotificationKind::Success,
                    "Configuration saved. Connecting to WiFi...",
                );
                Ok(())
            }
            Ok(res) => {
                notifications.show(NotificationKind::Error, "Server rejected configuration");
                bail!(
                    "configuration rejected with status {} and body: {}",
                    res.status,
                    res.body
                )
            }
            Err(e) => {
                notifications.show(NotificationKind::Error, format!("Upload failed: {e}"));
                Err(e.context("failed to upload configuration"))
            }
        }
    }
}
