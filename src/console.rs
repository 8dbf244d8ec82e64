//! Terminal renderer used by the companion binary

use crate::{
    ota::OtaStage,
    services::notification::{Notification, NotificationKind},
    status::{LiveStatusSnapshot, NetworkTransition, format_uptime},
    view::{ConfigView, NotificationView, OtaView, RebootView, StatusView},
};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::Notify;

/// Renders everything through the logger
///
/// Views that end a flow (OTA reload or dismissal, device reachable again)
/// also wake whoever waits on [`ConsoleRenderer::finished`].
#[derive(Default)]
pub struct ConsoleRenderer {
    finished: Notify,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves after the next flow ended, or immediately if one already
    /// ended unobserved
    pub async fn finished(&self) {
        self.finished.notified().await
    }

    fn finish(&self) {
        self.finished.notify_one();
    }
}

impl StatusView for ConsoleRenderer {
    fn render_status(&self, snapshot: &LiveStatusSnapshot) {
        let mut line = snapshot
            .fields()
            .filter(|(key, _)| key.as_str() != "uptime")
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>();

        if let Some(uptime) = snapshot.uptime() {
            line.push(format!("uptime={}", format_uptime(uptime)));
        }

        info!("status: {}", line.join(" "));
    }

    fn append_log(&self, level: &str, message: &str) {
        match level.to_ascii_lowercase().as_str() {
            "error" => error!("device: {message}"),
            "warn" | "warning" => warn!("device: {message}"),
            "debug" => debug!("device: {message}"),
            _ => info!("device: {message}"),
        }
    }

    fn network_transition(&self, transition: &NetworkTransition) {
        info!(
            "device joined {} as {} ({}), access point {} at {} is going away",
            transition.sta_ssid,
            transition.sta_ip,
            transition.hostname,
            transition.ap_ssid,
            transition.ap_ip
        );
    }
}

impl OtaView for ConsoleRenderer {
    fn render_ota_progress(&self, stage: OtaStage, percent: f64, message: &str) {
        info!("update {stage} {percent:.0}%: {message}");
    }

    fn hide_ota(&self) {
        info!("update display closed");
        self.finish();
    }

    fn reload(&self) {
        info!("update finished, reload the client");
        self.finish();
    }
}

impl RebootView for ConsoleRenderer {
    fn render_reboot_progress(&self, percent: f64, message: Option<&str>) {
        match message {
            Some(message) => info!("restart {percent:.0}%: {message}"),
            None => debug!("restart {percent:.0}%"),
        }
    }

    fn on_reachable(&self, target: &str) {
        info!("device reachable, continue at {target}");
        self.finish();
    }
}

impl ConfigView for ConsoleRenderer {
    fn render_config(&self, document: &Value) {
        match serde_json::to_string_pretty(document) {
            Ok(text) => info!("configuration:\n{text}"),
            Err(e) => warn!("cannot print configuration: {e}"),
        }
    }
}

impl NotificationView for ConsoleRenderer {
    fn show_notification(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Error => error!("{}", notification.text),
            _ => info!("{}", notification.text),
        }
    }

    fn hide_notification(&self) {}
}
