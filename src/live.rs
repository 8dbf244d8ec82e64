//! Live device state over two transports
//!
//! The push channel at `/ws` is primary and reconnects forever. The status
//! poll is a fallback that only fetches when enabled and when the push
//! channel has been quiet for longer than the staleness threshold. Both feed
//! the same dispatcher, so every update is a partial merge regardless of
//! where it came from.

use crate::{
    fetcher::{FetchOptions, MultiSourceFetcher},
    http_client::HttpTransport,
    ota::{OtaStage, OtaStateMachine},
    retry::RetryPolicy,
    session::Session,
    status::{LiveStatusSnapshot, scan_log_fields},
    timer::Timer,
    view::{OtaView, StatusView},
};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use serde::Deserialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Upper bound on the push channel's TCP connect plus WebSocket handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Inbound push channel frame, tagged by `type`
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushFrame {
    Status(LiveStatusSnapshot),
    Log {
        #[serde(default)]
        level: String,
        #[serde(default)]
        message: String,
    },
    Ota {
        stage: OtaStage,
        #[serde(default)]
        progress: f64,
        #[serde(default)]
        message: String,
    },
}

impl PushFrame {
    /// Parse a text frame. Unknown `type` tags and unknown OTA stages are errors.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse push frame")
    }
}

/// Routes frames and polled snapshots to the views and the OTA machine
pub struct LiveDispatcher<V, O> {
    session: Arc<Session>,
    view: Arc<V>,
    ota: Arc<OtaStateMachine<O>>,
}

impl<V: StatusView, O: OtaView> LiveDispatcher<V, O> {
    pub fn new(session: Arc<Session>, view: Arc<V>, ota: Arc<OtaStateMachine<O>>) -> Self {
        Self { session, view, ota }
    }

    /// Handle one raw push message. A malformed frame is logged and dropped.
    pub fn handle_text(&self, text: &str) {
        match PushFrame::parse(text) {
            Ok(frame) => {
                self.session.touch_live();
                self.handle_frame(frame);
            }
            Err(e) => warn!("dropping push frame: {e:#}"),
        }
    }

    pub fn handle_frame(&self, frame: PushFrame) {
        match frame {
            PushFrame::Status(snapshot) => self.fold_status(snapshot),
            PushFrame::Log { level, message } => {
                self.view.append_log(&level, &message);

                for (key, value) in scan_log_fields(&message) {
                    trace!("log field {key} = {value}");
                    let mut field = LiveStatusSnapshot::new();
                    field.insert(key, Value::String(value));
                    self.fold_status(field);
                }
            }
            PushFrame::Ota {
                stage,
                progress,
                message,
            } => self.ota.handle(stage, progress, &message),
        }
    }

    /// Merge a partial snapshot into the session and render it
    pub fn fold_status(&self, snapshot: LiveStatusSnapshot) {
        if snapshot.is_empty() {
            return;
        }

        self.session.merge_status(&snapshot);
        self.view.render_status(&snapshot);

        if let Some(transition) = snapshot.network_transition() {
            info!(
                "device joined {} as {}",
                transition.sta_ssid, transition.sta_ip
            );
            self.view.network_transition(&transition);
        }
    }
}

/// Push channel plus fallback poll, merged into one stream of updates
pub struct LiveStateChannel<T, V, O> {
    fetcher: MultiSourceFetcher<T>,
    dispatcher: Arc<LiveDispatcher<V, O>>,
    session: Arc<Session>,
    push_url: Url,
    status_candidates: Arc<[String]>,
    reconnect: Arc<dyn RetryPolicy>,
    poll_period: Duration,
    staleness: Duration,
    handshake_timeout: Duration,
    push: Timer,
    poller: Timer,
}

impl<T, V, O> LiveStateChannel<T, V, O>
where
    T: HttpTransport + Send + Sync + 'static,
    V: StatusView,
    O: OtaView,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: MultiSourceFetcher<T>,
        dispatcher: Arc<LiveDispatcher<V, O>>,
        session: Arc<Session>,
        push_url: Url,
        status_candidates: Vec<String>,
        reconnect: Arc<dyn RetryPolicy>,
        poll_period: Duration,
        staleness: Duration,
    ) -> Self {
        Self {
            fetcher,
            dispatcher,
            session,
            push_url,
            status_candidates: status_candidates.into(),
            reconnect,
            poll_period,
            staleness,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            push: Timer::new("push-channel"),
            poller: Timer::new("status-poll"),
        }
    }

    /// An attempt that has not completed its handshake within `timeout`
    /// counts as failed and is retried under the reconnect policy.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Open the push channel. Off the device there is nothing to connect to
    /// and the live feed relies on the poll alone.
    pub fn connect(&self) -> bool {
        if !self.fetcher.origin().is_on_device() {
            info!("push channel skipped, not running on the device");
            return false;
        }

        self.push.start_task(run_push_channel(
            self.push_url.clone(),
            self.dispatcher.clone(),
            self.reconnect.clone(),
            self.handshake_timeout,
        ));

        true
    }

    pub fn is_connected_or_retrying(&self) -> bool {
        self.push.is_active()
    }

    /// Enable or disable the status poll. The previous poll timer is always
    /// stopped first, there is never more than one.
    pub fn set_fallback_enabled(&self, enabled: bool) {
        if self.poller.stop() {
            debug!("status polling stopped");
        }

        if !enabled {
            return;
        }

        let fetcher = self.fetcher.clone();
        let dispatcher = self.dispatcher.clone();
        let session = self.session.clone();
        let candidates = self.status_candidates.clone();
        let staleness = self.staleness;

        self.poller.start_interval(self.poll_period, move || {
            let fetcher = fetcher.clone();
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            let candidates = candidates.clone();

            async move {
                if !session.is_stale(staleness) {
                    trace!("status poll skipped, push channel is live");
                    return;
                }

                match fetcher.fetch(&candidates, &FetchOptions::default()).await {
                    Some(payload) => dispatcher.fold_status(LiveStatusSnapshot::from_value(payload)),
                    None => debug!("status poll got no answer"),
                }
            }
        });
        debug!("status polling every {:?}", self.poll_period);
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_active()
    }

    pub fn shutdown(&self) {
        self.push.stop();
        self.poller.stop();
    }
}

async fn run_push_channel<V: StatusView, O: OtaView>(
    url: Url,
    dispatcher: Arc<LiveDispatcher<V, O>>,
    policy: Arc<dyn RetryPolicy>,
    handshake_timeout: Duration,
) {
    let mut failures = 0u32;

    loop {
        match time::timeout(handshake_timeout, connect_async(url.as_str())).await {
            Ok(Ok((mut stream, _))) => {
                info!("push channel connected to {url}");
                failures = 0;

                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => dispatcher.handle_text(&text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("push channel error: {e}");
                            break;
                        }
                    }
                }

                warn!("push channel lost");
            }
            Ok(Err(e)) => debug!("push channel connect to {url} failed: {e}"),
            Err(_) => {
                debug!("push channel handshake with {url} timed out after {handshake_timeout:?}")
            }
        }

        failures += 1;
        let Some(delay) = policy.next_delay(failures) else {
            warn!("push channel gave up after {failures} attempts");
            return;
        };

        debug!("push channel reconnecting in {delay:?}");
        time::sleep(delay).await;
    }
}
