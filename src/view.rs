//! Outward-facing collaborators
//!
//! The link never draws anything itself. Whatever presents the device state
//! (a terminal, a GUI, a test recorder) implements these traits.

use crate::{
    ota::OtaStage,
    services::notification::Notification,
    status::{LiveStatusSnapshot, NetworkTransition},
};
use serde_json::Value;

pub trait StatusView: Send + Sync + 'static {
    /// Called with the partial snapshot as received, absent fields unchanged
    fn render_status(&self, snapshot: &LiveStatusSnapshot);

    fn append_log(&self, level: &str, message: &str);

    fn network_transition(&self, transition: &NetworkTransition);
}

pub trait OtaView: Send + Sync + 'static {
    fn render_ota_progress(&self, stage: OtaStage, percent: f64, message: &str);

    fn hide_ota(&self);

    /// Start over against the freshly flashed firmware
    fn reload(&self);
}

pub trait RebootView: Send + Sync + 'static {
    fn render_reboot_progress(&self, percent: f64, message: Option<&str>);

    fn on_reachable(&self, target: &str);
}

pub trait ConfigView: Send + Sync + 'static {
    fn render_config(&self, document: &Value);
}

pub trait NotificationView: Send + Sync + 'static {
    fn show_notification(&self, notification: &Notification);

    fn hide_notification(&self);
}
