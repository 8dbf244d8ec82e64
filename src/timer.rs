use log::trace;
use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    task::AbortHandle,
    time::{self, Instant, MissedTickBehavior},
};

/// Handle owning at most one scheduled task.
///
/// Arming the timer always aborts whatever it was running before, so a
/// component holding a `Timer` can never end up with two overlapping loops.
/// Dropping the handle cancels the task.
#[derive(Debug, Default)]
pub struct Timer {
    name: &'static str,
    handle: Mutex<Option<AbortHandle>>,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Run `tick` every `period`, first run one period from now.
    ///
    /// A tick that takes longer than the period delays the following ones
    /// instead of bursting to catch up.
    pub fn start_interval<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let first = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                tick().await;
            }
        });

        self.replace(task.abort_handle());
        trace!("{} timer armed with period {period:?}", self.name);
    }

    /// Run `action` once after `delay`.
    pub fn start_once<Fut>(&self, delay: Duration, action: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let task = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            action.await;
        });

        self.replace(task.abort_handle());
        trace!("{} timer armed once after {delay:?}", self.name);
    }

    /// Run `task` right away, owned and cancelled like a scheduled one.
    pub fn start_task<Fut>(&self, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(task);

        self.replace(task.abort_handle());
        trace!("{} task started", self.name);
    }

    /// Cancel the scheduled task. Returns whether one was still pending.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.lock().take() else {
            return false;
        };

        let was_pending = !handle.is_finished();
        handle.abort();

        if was_pending {
            trace!("{} timer stopped", self.name);
        }

        was_pending
    }

    pub fn is_active(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn replace(&self, handle: AbortHandle) {
        if let Some(previous) = self.lock().replace(handle) {
            previous.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
        }
    }
}
