//! Comparing the installed firmware with the published one

use crate::{
    config::PageOrigin,
    fetcher::{FetchOptions, MultiSourceFetcher},
    http_client::HttpTransport,
};
use log::info;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateAvailability {
    pub installed: Option<String>,
    /// `None` when the manifest could not be fetched
    pub remote: Option<String>,
    pub update_available: bool,
    pub download_url: String,
}

impl UpdateAvailability {
    pub fn remote_label(&self) -> &str {
        self.remote.as_deref().unwrap_or("Not available")
    }
}

pub struct UpdateCheck;

impl UpdateCheck {
    pub const FIRMWARE_PAGE: &str = "https://kamilbaranski.com/kbWinder/firmware/";

    /// Fetch the published manifest and compare versions
    ///
    /// # Arguments
    /// * `fetcher` - resolver, the manifest is always fetched cache-busted
    /// * `manifest_url` - absolute manifest address
    /// * `installed` - version from the device configuration, if known
    /// * `vendor_host` - host that publishes firmware next to the client
    pub async fn check<T: HttpTransport>(
        fetcher: &MultiSourceFetcher<T>,
        manifest_url: &str,
        installed: Option<&str>,
        vendor_host: &str,
    ) -> UpdateAvailability {
        let remote = fetcher
            .fetch(&[manifest_url.to_string()], &FetchOptions::bust_cache())
            .await
            .and_then(|manifest| manifest_version(&manifest));

        let installed = installed
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let update_available = match (&installed, &remote) {
            (Some(local), Some(remote)) => local != remote,
            _ => false,
        };

        if update_available {
            info!(
                "new firmware {} available, installed {}",
                remote.as_deref().unwrap_or_default(),
                installed.as_deref().unwrap_or_default()
            );
        }

        UpdateAvailability {
            installed,
            remote,
            update_available,
            download_url: download_url(fetcher.origin(), vendor_host),
        }
    }
}

fn manifest_version(manifest: &Value) -> Option<String> {
    let version = match manifest.get("version")? {
        Value::String(version) => version.trim().to_string(),
        Value::Number(version) => version.to_string(),
        _ => return None,
    };

    (!version.is_empty()).then_some(version)
}

fn download_url(origin: &PageOrigin, vendor_host: &str) -> String {
    let on_vendor_site = origin
        .base_url()
        .and_then(|url| url.host_str())
        .is_some_and(|host| host.contains(vendor_host));

    if on_vendor_site {
        "firmware/".to_string()
    } else {
        UpdateCheck::FIRMWARE_PAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::tests::{Reply, ScriptedTransport};
    use std::{sync::Arc, time::Duration};
    use url::Url;

    const MANIFEST: &str = "https://kamilbaranski.com/kbWinder/firmware/update.json";

    fn fetcher(transport: ScriptedTransport, origin: PageOrigin) -> MultiSourceFetcher<ScriptedTransport> {
        MultiSourceFetcher::new(Arc::new(transport), origin, Duration::from_secs(3))
    }

    fn device() -> PageOrigin {
        PageOrigin::Device(Url::parse("http://192.168.4.1").unwrap())
    }

    #[tokio::test]
    async fn test_newer_remote_version() {
        let fetcher = fetcher(
            ScriptedTransport::default()
                .reply(MANIFEST, Reply::Status(200, r#"{"version":" 1.5.0 \n"}"#)),
            device(),
        );

        let result = UpdateCheck::check(&fetcher, MANIFEST, Some("1.4.2"), "kamilbaranski.com").await;

        assert_eq!(result.remote.as_deref(), Some("1.5.0"));
        assert!(result.update_available);
        assert_eq!(result.download_url, UpdateCheck::FIRMWARE_PAGE);
    }

    #[tokio::test]
    async fn test_same_version() {
        let fetcher = fetcher(
            ScriptedTransport::default().reply(MANIFEST, Reply::Status(200, r#"{"version":"1.4.2"}"#)),
            device(),
        );

        let result = UpdateCheck::check(&fetcher, MANIFEST, Some("1.4.2 "), "kamilbaranski.com").await;

        assert!(!result.update_available);
    }

    #[tokio::test]
    async fn test_manifest_unavailable() {
        let fetcher = fetcher(ScriptedTransport::default(), device());

        let result = UpdateCheck::check(&fetcher, MANIFEST, Some("1.4.2"), "kamilbaranski.com").await;

        assert_eq!(result.remote, None);
        assert_eq!(result.remote_label(), "Not available");
        assert!(!result.update_available);
    }

    #[tokio::test]
    async fn test_unknown_installed_version_never_offers_update() {
        let fetcher = fetcher(
            ScriptedTransport::default().reply(MANIFEST, Reply::Status(200, r#"{"version":"2.0"}"#)),
            PageOrigin::Remote(Url::parse("https://kamilbaranski.com/kbWinder/").unwrap()),
        );

        let result = UpdateCheck::check(&fetcher, MANIFEST, None, "kamilbaranski.com").await;

        assert!(!result.update_available);
        assert_eq!(result.download_url, "firmware/");
    }
}
