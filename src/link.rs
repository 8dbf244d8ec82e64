//! One client session against one device
//!
//! `WinderLink` owns the session state and wires every component to the same
//! transport and renderer.

use crate::{
    config::AppConfig,
    device::{DeviceClient, HttpCommandSink},
    fetcher::MultiSourceFetcher,
    http_client::HttpTransport,
    live::{LiveDispatcher, LiveStateChannel},
    ota::OtaStateMachine,
    reboot::{RebootProgress, RebootSequencer, RebootTiming},
    retry::FixedDelay,
    services::{
        configuration::ConfigurationService,
        firmware::FirmwareUpdate,
        notification::NotificationCenter,
        update_check::{UpdateAvailability, UpdateCheck},
        wifi::{WifiNetwork, WifiScanner},
    },
    session::Session,
    view::{ConfigView, NotificationView, OtaView, RebootView, StatusView},
    watchdog::{CommandSink, CommandWatchdog},
};
use anyhow::{Context, Result, bail};
use log::info;
use serde_json::Value;
use std::sync::Arc;

/// Everything a client presents
pub trait Renderer: StatusView + OtaView + RebootView + ConfigView + NotificationView {}

impl<R> Renderer for R where R: StatusView + OtaView + RebootView + ConfigView + NotificationView {}

pub struct WinderLink<T, R> {
    config: AppConfig,
    session: Arc<Session>,
    fetcher: MultiSourceFetcher<T>,
    device: DeviceClient<T>,
    renderer: Arc<R>,
    commands: Arc<HttpCommandSink<T>>,
    watchdog: CommandWatchdog<HttpCommandSink<T>>,
    ota: Arc<OtaStateMachine<R>>,
    live: LiveStateChannel<T, R, R>,
    notifications: NotificationCenter<R>,
}

impl<T, R> WinderLink<T, R>
where
    T: HttpTransport + Send + Sync + 'static,
    R: Renderer,
{
    /// Ask the device to report its variables as log lines
    pub const DUMP_COMMAND: &str = "GET";

    pub fn new(config: AppConfig, transport: Arc<T>, renderer: Arc<R>) -> Result<Self> {
        let timing = &config.timing;
        let session = Arc::new(Session::new());

        let fetcher = MultiSourceFetcher::new(
            transport.clone(),
            config.device.origin.clone(),
            timing.fetch_timeout,
        );
        let device = DeviceClient::new(
            transport,
            config.device.device_base().clone(),
            timing.fetch_timeout,
        );

        let commands = Arc::new(HttpCommandSink::new(device.clone()));
        let watchdog = CommandWatchdog::new(commands.clone(), timing.keep_alive_period);

        let ota = Arc::new(OtaStateMachine::new(
            renderer.clone(),
            timing.ota_reload_delay,
            timing.ota_dismiss_delay,
        ));
        let dispatcher = Arc::new(LiveDispatcher::new(
            session.clone(),
            renderer.clone(),
            ota.clone(),
        ));
        let live = LiveStateChannel::new(
            fetcher.clone(),
            dispatcher,
            session.clone(),
            config
                .device
                .push_url()
                .context("failed to derive push channel url")?,
            config.device.status_candidates(),
            Arc::new(FixedDelay::forever(timing.reconnect_delay)),
            timing.poll_period,
            timing.staleness_threshold,
        )
        .with_handshake_timeout(timing.fetch_timeout);

        let notifications =
            NotificationCenter::new(renderer.clone(), timing.notification_dismiss_delay);

        Ok(Self {
            config,
            session,
            fetcher,
            device,
            renderer,
            commands,
            watchdog,
            ota,
            live,
            notifications,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn watchdog(&self) -> &CommandWatchdog<HttpCommandSink<T>> {
        &self.watchdog
    }

    pub fn live(&self) -> &LiveStateChannel<T, R, R> {
        &self.live
    }

    pub fn ota(&self) -> &OtaStateMachine<R> {
        &self.ota
    }

    /// Load and render the configuration, apply its poll setting and ask the
    /// device for a variable dump
    pub async fn load_configuration(&self) -> bool {
        let loaded = ConfigurationService::load(
            &self.fetcher,
            &self.config.device.configuration_candidates(),
            &self.session,
            self.renderer.as_ref(),
        )
        .await;

        self.live
            .set_fallback_enabled(self.session.configuration().web_status_update());
        self.commands.send_command(Self::DUMP_COMMAND);

        loaded
    }

    /// Send one command and wait for the reply, unlike the fire-and-forget
    /// commands of the watchdog
    pub async fn send_command(&self, command: &str) -> Result<String> {
        self.device.command(command).await
    }

    /// Open the push channel, if the client runs on the device
    pub fn start_live(&self) -> bool {
        self.live.connect()
    }

    pub fn set_status_polling(&self, enabled: bool) {
        self.session.update_configuration(|doc| {
            doc.set("system", "webStatusUpdate", Value::Bool(enabled));
        });
        self.live.set_fallback_enabled(enabled);
    }

    pub async fn upload_configuration(&self) -> Result<()> {
        ConfigurationService::upload(&self.device, &self.session, &self.notifications).await
    }

    /// Restart the device and wait until it answers again
    pub async fn restart(&self, target: &str) -> Result<RebootProgress> {
        self.device
            .restart()
            .await
            .context("failed to request restart")?;

        self.reboot_sequencer().run(target).await
    }

    /// Wait for the device after something else made it restart
    pub fn reboot_sequencer(&self) -> RebootSequencer<T, R> {
        let timing = &self.config.timing;

        RebootSequencer::new(
            self.fetcher.clone(),
            self.renderer.clone(),
            self.config.device.status_candidates(),
            RebootTiming {
                grace: timing.reboot_grace,
                progress_tick: timing.reboot_progress_tick,
                redirect_delay: timing.redirect_delay,
            },
            Arc::new(FixedDelay::forever(timing.reboot_poll_period)),
        )
    }

    /// Trigger a firmware update. Progress only arrives over the push channel,
    /// so the update is refused when that channel cannot be opened.
    pub async fn start_update(&self) -> Result<()> {
        if !self.live.is_connected_or_retrying() && !self.live.connect() {
            bail!("update progress needs the push channel, which is only available on the device");
        }

        FirmwareUpdate::start(&self.device, &self.ota).await
    }

    pub async fn scan_wifi(&self) -> Result<Vec<WifiNetwork>> {
        WifiScanner::new(self.device.clone(), self.config.timing.wifi_scan_poll_period)
            .scan()
            .await
    }

    pub async fn check_update(&self) -> UpdateAvailability {
        let installed = self.session.configuration().installed_version().map(str::to_string);

        UpdateCheck::check(
            &self.fetcher,
            &self.config.update.manifest_url,
            installed.as_deref(),
            &self.config.device.vendor_host,
        )
        .await
    }

    /// Release any held command and stop every background task
    pub fn shutdown(&self) {
        self.watchdog.end();
        self.live.shutdown();
        info!("link shut down");
    }
}
