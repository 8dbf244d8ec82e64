use crate::{services::configuration::ConfigurationDocument, status::LiveStatusSnapshot};
use std::{
    sync::{Mutex, PoisonError, RwLock},
    time::Duration,
};
use tokio::time::Instant;

/// State shared by every component of one client session
///
/// Holds the single configuration document, the merged live status and the
/// time of the last push message. Guards are never held across an await.
#[derive(Debug)]
pub struct Session {
    configuration: RwLock<ConfigurationDocument>,
    status: Mutex<LiveStatusSnapshot>,
    last_live_message: Mutex<Option<Instant>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            configuration: RwLock::new(ConfigurationDocument::with_sections()),
            status: Mutex::new(LiveStatusSnapshot::new()),
            last_live_message: Mutex::new(None),
        }
    }

    pub fn configuration(&self) -> ConfigurationDocument {
        self.configuration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_configuration<R>(&self, update: impl FnOnce(&mut ConfigurationDocument) -> R) -> R {
        let mut doc = self
            .configuration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        update(&mut doc)
    }

    pub fn status(&self) -> LiveStatusSnapshot {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last write wins per field, whichever transport delivered it
    pub fn merge_status(&self, update: &LiveStatusSnapshot) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_from(update);
    }

    pub fn touch_live(&self) {
        *self
            .last_live_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Time since the last push message, `None` if none arrived yet
    pub fn live_age(&self) -> Option<Duration> {
        self.last_live_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|at| at.elapsed())
    }

    /// True when no push message arrived within `threshold`
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.live_age().is_none_or(|age| age > threshold)
    }
}
