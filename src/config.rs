use anyhow::{Context, Result};
use std::{env, sync::OnceLock, time::Duration};
use url::Url;

/// Application configuration loaded at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Where the client runs and how the device is addressed
    pub device: DeviceConfig,

    /// Firmware update manifest configuration
    pub update: UpdateConfig,

    /// Every delay and period used by the link
    pub timing: Timing,
}

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub origin: PageOrigin,
    /// Absolute device address used whenever relative paths cannot be reached
    pub fallback_url: Url,
    pub vendor_host: String,
}

#[derive(Clone, Debug)]
pub struct UpdateConfig {
    pub manifest_url: String,
}

/// Where the client was loaded from.
///
/// Relative candidates only make sense when the client is served by something
/// that also answers `/api/...`; a local file can only reach absolute URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageOrigin {
    Device(Url),
    Remote(Url),
    LocalFile,
}

impl PageOrigin {
    /// Classify an origin URL, `file` (or a `file:` URL) selects `LocalFile`.
    pub fn parse(origin: &str, vendor_host: &str) -> Result<Self> {
        let origin = origin.trim();

        if origin == "file" || origin.starts_with("file:") {
            return Ok(Self::LocalFile);
        }

        let url = Url::parse(origin).context(format!("failed to parse origin: {origin}"))?;

        match url.host_str() {
            Some(host) if !is_loopback(host) && !host.contains(vendor_host) => Ok(Self::Device(url)),
            _ => Ok(Self::Remote(url)),
        }
    }

    pub fn base_url(&self) -> Option<&Url> {
        match self {
            Self::Device(url) | Self::Remote(url) => Some(url),
            Self::LocalFile => None,
        }
    }

    pub fn is_on_device(&self) -> bool {
        matches!(self, Self::Device(_))
    }

    pub fn is_local_file(&self) -> bool {
        matches!(self, Self::LocalFile)
    }
}

fn is_loopback(host: &str) -> bool {
    host.is_empty() || host == "localhost" || host == "127.0.0.1"
}

/// Delays and periods of every timer in the link
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    pub fetch_timeout: Duration,
    pub keep_alive_period: Duration,
    pub reconnect_delay: Duration,
    pub poll_period: Duration,
    pub staleness_threshold: Duration,
    pub reboot_grace: Duration,
    pub reboot_poll_period: Duration,
    pub reboot_progress_tick: Duration,
    pub redirect_delay: Duration,
    pub ota_reload_delay: Duration,
    pub ota_dismiss_delay: Duration,
    pub notification_dismiss_delay: Duration,
    pub wifi_scan_poll_period: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(3),
            keep_alive_period: Duration::from_millis(700),
            reconnect_delay: Duration::from_secs(2),
            poll_period: Duration::from_secs(10),
            staleness_threshold: Duration::from_secs(5),
            reboot_grace: Duration::from_secs(3),
            reboot_poll_period: Duration::from_secs(1),
            reboot_progress_tick: Duration::from_millis(400),
            redirect_delay: Duration::from_millis(500),
            ota_reload_delay: Duration::from_secs(5),
            ota_dismiss_delay: Duration::from_secs(5),
            notification_dismiss_delay: Duration::from_secs(5),
            wifi_scan_poll_period: Duration::from_millis(1500),
        }
    }
}

impl AppConfig {
    /// Process-wide configuration, read from the environment on first use
    ///
    /// # Panics
    /// Panics if configuration loading fails, the link cannot address a device
    /// without a valid origin.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| Self::from_env().expect("failed to load application configuration"))
    }

    pub fn from_env() -> Result<Self> {
        let device = DeviceConfig::load()?;
        let update = UpdateConfig::load();

        Ok(Self {
            device,
            update,
            timing: Timing::default(),
        })
    }

    /// Base URL for direct device endpoints (`/api/cmd`, `/api/restart`, ...)
    pub fn device_base(&self) -> &Url {
        self.device.device_base()
    }
}

impl DeviceConfig {
    const DEFAULT_ORIGIN: &str = "http://kbwinder.local";
    const DEFAULT_FALLBACK_URL: &str = "http://kbwinder-6b33.local";
    const DEFAULT_VENDOR_HOST: &str = "kamilbaranski.com";

    fn load() -> Result<Self> {
        let vendor_host =
            env::var("WINDER_VENDOR_HOST").unwrap_or_else(|_| Self::DEFAULT_VENDOR_HOST.to_string());

        let origin = PageOrigin::parse(
            &env::var("WINDER_ORIGIN").unwrap_or_else(|_| Self::DEFAULT_ORIGIN.to_string()),
            &vendor_host,
        )?;

        let fallback_url = env::var("WINDER_FALLBACK_URL")
            .unwrap_or_else(|_| Self::DEFAULT_FALLBACK_URL.to_string());
        let fallback_url = Url::parse(&fallback_url)
            .context(format!("failed to parse WINDER_FALLBACK_URL: {fallback_url}"))?;

        Ok(Self {
            origin,
            fallback_url,
            vendor_host,
        })
    }

    pub fn device_base(&self) -> &Url {
        match &self.origin {
            PageOrigin::Device(url) => url,
            _ => &self.fallback_url,
        }
    }

    /// Candidates for `GET /api/status`, in fallback priority order
    pub fn status_candidates(&self) -> Vec<String> {
        vec![
            "/api/status".to_string(),
            self.fallback_url
                .join("/api/status")
                .map(String::from)
                .unwrap_or_else(|_| format!("{}api/status", self.fallback_url)),
        ]
    }

    /// Candidates for `GET /api/configuration`, in fallback priority order
    pub fn configuration_candidates(&self) -> Vec<String> {
        vec![
            "/api/configuration".to_string(),
            self.fallback_url
                .join("/api/configuration")
                .map(String::from)
                .unwrap_or_else(|_| format!("{}api/configuration", self.fallback_url)),
        ]
    }

    /// Push channel address, derived from the device base
    pub fn push_url(&self) -> Result<Url> {
        let base = self.device_base();
        let host = base.host_str().context("device base has no host")?;
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Url::parse(&format!("ws://{authority}/ws")).context("failed to build push channel url")
    }
}

impl UpdateConfig {
    const DEFAULT_MANIFEST_URL: &str = "https://kamilbaranski.com/kbWinder/firmware/update.json";

    fn load() -> Self {
        let manifest_url = env::var("WINDER_UPDATE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_MANIFEST_URL.to_string());

        Self { manifest_url }
    }
}
