use crate::{timer::Timer, view::NotificationView};
use std::{fmt, sync::Arc, time::Duration};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Error,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Info => write!(f, "info"),
            NotificationKind::Success => write!(f, "success"),
            NotificationKind::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
}

/// Single transient notice that hides itself after a delay
pub struct NotificationCenter<V> {
    view: Arc<V>,
    dismiss_delay: Duration,
    auto_hide: Timer,
}

impl<V: NotificationView> NotificationCenter<V> {
    pub fn new(view: Arc<V>, dismiss_delay: Duration) -> Self {
        Self {
            view,
            dismiss_delay,
            auto_hide: Timer::new("notification"),
        }
    }

    /// Show `text`, replacing any visible notice and restarting the hide delay
    pub fn show(&self, kind: NotificationKind, text: impl Into<String>) {
        let notification = Notification {
            kind,
            text: text.into(),
        };
        self.view.show_notification(&notification);

        let view = self.view.clone();
        self.auto_hide.start_once(self.dismiss_delay, async move {
            view.hide_notification();
        });
    }
}
