//! Firmware update progress
//!
//! Stage notifications only ever arrive over the push channel. Every
//! notification redraws the progress display, there is no validation of the
//! stage order. Entering a terminal stage schedules exactly one side effect:
//! a reload after SUCCESS, hiding the display after ERROR.

use crate::{timer::Timer, view::OtaView};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OtaStage {
    #[default]
    Init,
    FsStart,
    BinStart,
    Success,
    Error,
}

impl OtaStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, OtaStage::Success | OtaStage::Error)
    }
}

impl fmt::Display for OtaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OtaStage::Init => "INIT",
            OtaStage::FsStart => "FS_START",
            OtaStage::BinStart => "BIN_START",
            OtaStage::Success => "SUCCESS",
            OtaStage::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OtaProgressState {
    pub stage: OtaStage,
    pub percent: f64,
    pub message: String,
}

pub struct OtaStateMachine<V> {
    view: Arc<V>,
    state: Mutex<OtaProgressState>,
    terminal_action: Timer,
    reload_delay: Duration,
    dismiss_delay: Duration,
}

impl<V: OtaView> OtaStateMachine<V> {
    pub const INIT_MESSAGE: &str = "Initializing update...";

    pub fn new(view: Arc<V>, reload_delay: Duration, dismiss_delay: Duration) -> Self {
        Self {
            view,
            state: Mutex::new(OtaProgressState::default()),
            terminal_action: Timer::new("ota-terminal"),
            reload_delay,
            dismiss_delay,
        }
    }

    pub fn state(&self) -> OtaProgressState {
        self.lock().clone()
    }

    /// Show the display at 0 % before triggering an update. Does not move the
    /// machine, the device's notifications do.
    pub fn arm(&self) {
        self.terminal_action.stop();

        let mut state = self.lock();
        *state = OtaProgressState {
            stage: OtaStage::Init,
            percent: 0.0,
            message: Self::INIT_MESSAGE.to_string(),
        };

        self.view
            .render_ota_progress(state.stage, state.percent, &state.message);
    }

    /// The trigger was refused, nothing will follow
    pub fn abort(&self) {
        self.terminal_action.stop();
        self.view.hide_ota();
    }

    pub fn handle(&self, stage: OtaStage, progress: f64, device_message: &str) {
        let mut state = self.lock();
        let previous = state.stage;

        // a non-terminal notification after a terminal one is a new update run
        if previous.is_terminal() && !stage.is_terminal() {
            self.terminal_action.stop();
            state.percent = 0.0;
        }

        let reported = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };

        state.percent = match stage {
            OtaStage::Error => reported,
            _ => state.percent.max(reported),
        };

        state.message = match stage {
            OtaStage::Init if device_message.is_empty() => Self::INIT_MESSAGE.to_string(),
            OtaStage::Init => device_message.to_string(),
            OtaStage::FsStart => "Step 1/2: Updating Filesystem...".to_string(),
            OtaStage::BinStart => "Step 2/2: Updating Firmware...".to_string(),
            OtaStage::Success => "Success! Device is rebooting...".to_string(),
            OtaStage::Error => format!("Error: {device_message}"),
        };
        state.stage = stage;

        self.view
            .render_ota_progress(state.stage, state.percent, &state.message);

        if !stage.is_terminal() || previous == stage {
            return;
        }

        let view = self.view.clone();
        match stage {
            OtaStage::Success => {
                info!("firmware update succeeded, reloading in {:?}", self.reload_delay);
                self.terminal_action.start_once(self.reload_delay, async move {
                    view.reload();
                });
            }
            _ => {
                warn!("firmware update failed: {device_message}");
                self.terminal_action.start_once(self.dismiss_delay, async move {
                    view.hide_ota();
                });
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OtaProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
