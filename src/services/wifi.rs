use crate::{device::DeviceClient, http_client::HttpTransport};
use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WifiScanStatus {
    Scanning,
    Ready,
    Failed,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WifiNetwork {
    pub ssid: String,
    pub rssi: i32,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WifiScanReport {
    pub status: WifiScanStatus,
    #[serde(default)]
    pub networks: Vec<WifiNetwork>,
}

pub struct WifiScanner<T> {
    client: DeviceClient<T>,
    poll_period: Duration,
}

impl<T: HttpTransport> WifiScanner<T> {
    pub fn new(client: DeviceClient<T>, poll_period: Duration) -> Self {
        Self {
            client,
            poll_period,
        }
    }

    /// Start a scan and poll until the device reports a result.
    ///
    /// Any failure while polling ends the scan, it is not retried.
    pub async fn scan(&self) -> Result<Vec<WifiNetwork>> {
        self.client
            .wifi_scan_start()
            .await
            .context("could not start scan")?;
        info!("wifi scan started");

        let mut poll = time::interval_at(Instant::now() + self.poll_period, self.poll_period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll.tick().await;

            let report = self
                .client
                .wifi_scan_results()
                .await
                .context("wifi scan polling failed")?;

            match report.status {
                WifiScanStatus::Scanning => debug!("wifi scan still running"),
                WifiScanStatus::Ready => {
                    info!("wifi scan found {} networks", report.networks.len());
                    return Ok(report.networks);
                }
                WifiScanStatus::Failed => bail!("scan failed"),
            }
        }
    }
}
