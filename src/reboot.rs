//! Waiting for the device to come back after a restart
//!
//! Progress is simulated while the device is gone: it creeps up by a random
//! step every tick and stops at 90 %. Only a real answer from the device takes
//! it to 100 %. Connection failures while waiting are expected and retried
//! according to the policy, which never gives up by default.

use crate::{
    fetcher::{FetchOptions, MultiSourceFetcher},
    http_client::HttpTransport,
    retry::RetryPolicy,
    timer::Timer,
    view::RebootView,
};
use anyhow::{Result, bail};
use log::{debug, info};
use rand::Rng;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::time;

/// Highest value the simulated progress reaches on its own
pub const SIMULATED_CAP: f64 = 90.0;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RebootProgress {
    pub simulated_percent: f64,
    pub attempt_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebootTiming {
    /// Time for the device to tear down its old network stack
    pub grace: Duration,
    pub progress_tick: Duration,
    pub redirect_delay: Duration,
}

pub struct RebootSequencer<T, V> {
    fetcher: MultiSourceFetcher<T>,
    view: Arc<V>,
    probe_candidates: Vec<String>,
    timing: RebootTiming,
    policy: Arc<dyn RetryPolicy>,
}

impl<T: HttpTransport, V: RebootView> RebootSequencer<T, V> {
    pub const DEFAULT_TARGET: &str = "/setup";
    pub const BACK_ONLINE_MESSAGE: &str = "Device back online! Redirecting...";

    pub fn new(
        fetcher: MultiSourceFetcher<T>,
        view: Arc<V>,
        probe_candidates: Vec<String>,
        timing: RebootTiming,
        policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            fetcher,
            view,
            probe_candidates,
            timing,
            policy,
        }
    }

    /// Show progress until the device answers again, then hand over to
    /// `target`
    ///
    /// # Arguments
    /// * `target` - where the view goes once the device is reachable
    ///
    /// # Returns
    /// The final progress. An error only if the retry policy gave up.
    pub async fn run(&self, target: &str) -> Result<RebootProgress> {
        let progress = Arc::new(Mutex::new(RebootProgress::default()));
        let simulation = Timer::new("reboot-progress");

        self.view.render_reboot_progress(0.0, None);

        let view = self.view.clone();
        let simulated = progress.clone();
        simulation.start_interval(self.timing.progress_tick, move || {
            let mut progress = simulated.lock().unwrap_or_else(PoisonError::into_inner);

            if progress.simulated_percent < SIMULATED_CAP {
                let step: f64 = rand::thread_rng().gen_range(0.0..2.0);
                progress.simulated_percent =
                    (progress.simulated_percent + step).min(SIMULATED_CAP);
                view.render_reboot_progress(progress.simulated_percent, None);
            }

            std::future::ready(())
        });

        time::sleep(self.timing.grace).await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            Self::lock(&progress).attempt_count = attempt;

            if self
                .fetcher
                .fetch(&self.probe_candidates, &FetchOptions::no_store())
                .await
                .is_some()
            {
                break;
            }

            let Some(delay) = self.policy.next_delay(attempt) else {
                simulation.stop();
                bail!("device did not come back after {attempt} attempts");
            };

            debug!("device not reachable yet (attempt {attempt})");
            time::sleep(delay).await;
        }

        simulation.stop();

        let result = {
            let mut progress = Self::lock(&progress);
            progress.simulated_percent = 100.0;
            progress.clone()
        };

        info!("device reachable after {} attempts", result.attempt_count);
        self.view
            .render_reboot_progress(100.0, Some(Self::BACK_ONLINE_MESSAGE));

        time::sleep(self.timing.redirect_delay).await;
        self.view.on_reachable(target);

        Ok(result)
    }

    fn lock(progress: &Mutex<RebootProgress>) -> std::sync::MutexGuard<'_, RebootProgress> {
        progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
