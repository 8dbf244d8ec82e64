//! Dead-man's switch for continuous motion commands
//!
//! While a motion command is held the device gets a keep-alive ping every
//! period. The device stops on its own when pings stop arriving, the client
//! additionally sends an explicit stop on release.

use crate::timer::Timer;
use log::{debug, info};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

/// Fire-and-forget command channel to the device
pub trait CommandSink: Send + Sync + 'static {
    fn send_command(&self, command: &str);
}

#[derive(Debug, Default)]
struct CommandSession {
    active: bool,
    command: Option<String>,
}

pub struct CommandWatchdog<S> {
    sink: Arc<S>,
    period: Duration,
    session: Mutex<CommandSession>,
    keep_alive: Timer,
}

impl<S: CommandSink> CommandWatchdog<S> {
    pub const KEEP_ALIVE: &str = "JOG PING";
    pub const STOP: &str = "STOP";

    pub fn new(sink: Arc<S>, period: Duration) -> Self {
        Self {
            sink,
            period,
            session: Mutex::new(CommandSession::default()),
            keep_alive: Timer::new("keep-alive"),
        }
    }

    /// Start `command` and keep it alive. Returns `false` and does nothing if
    /// a command is already running.
    pub fn begin(&self, command: &str) -> bool {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        if session.active {
            debug!("ignoring {command}, {:?} still active", session.command);
            return false;
        }

        session.active = true;
        session.command = Some(command.to_string());

        info!("begin {command}");
        self.sink.send_command(command);

        let sink = self.sink.clone();
        self.keep_alive.start_interval(self.period, move || {
            sink.send_command(Self::KEEP_ALIVE);
            std::future::ready(())
        });

        true
    }

    /// Stop the running command. The keep-alive timer is always cleared,
    /// the stop command is only sent if a command was active.
    pub fn end(&self) -> bool {
        self.keep_alive.stop();

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        if !session.active {
            return false;
        }

        session.active = false;
        let command = session.command.take();

        info!("end {}", command.as_deref().unwrap_or_default());
        self.sink.send_command(Self::STOP);

        true
    }

    pub fn is_active(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
    }

    pub fn has_keep_alive_timer(&self) -> bool {
        self.keep_alive.is_active()
    }
}
