//! Firmware update trigger

use crate::{
    device::DeviceClient, http_client::HttpTransport, ota::OtaStateMachine, view::OtaView,
};
use anyhow::Result;
use log::{error, info};

/// Starts an over-the-air update on the device
pub struct FirmwareUpdate;

impl FirmwareUpdate {
    /// Show the progress display and ask the device to update
    ///
    /// # Arguments
    /// * `client` - device API client
    /// * `ota` - state machine fed by the push channel
    ///
    /// # Returns
    /// Ok once the device accepted. The state machine does not move here,
    /// progress arrives as push notifications. A refused or failed trigger
    /// hides the display again.
    pub async fn start<T: HttpTransport, O: OtaView>(
        client: &DeviceClient<T>,
        ota: &OtaStateMachine<O>,
    ) -> Result<()> {
        ota.arm();

        if let Err(e) = client.trigger_update().await {
            error!("could not start update: {e:#}");
            ota.abort();
            return Err(e.context("could not start update"));
        }

        info!("update command accepted, following progress on the push channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fetcher::tests::{Reply, ScriptedTransport},
        ota::{
            OtaStage,
            tests::{OtaEvent, RecordingOtaView},
        },
    };
    use std::{sync::Arc, time::Duration};
    use url::Url;

    fn setup(
        reply: Reply,
    ) -> (
        Arc<RecordingOtaView>,
        DeviceClient<ScriptedTransport>,
        OtaStateMachine<RecordingOtaView>,
    ) {
        let transport =
            Arc::new(ScriptedTransport::default().reply("http://192.168.4.1/api/update", reply));
        let client = DeviceClient::new(
            transport,
            Url::parse("http://192.168.4.1").unwrap(),
            Duration::from_secs(3),
        );
        let view = Arc::new(RecordingOtaView::default());
        let ota = OtaStateMachine::new(view.clone(), Duration::from_secs(5), Duration::from_secs(5));
        (view, client, ota)
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_trigger_only_arms() {
        let (view, client, ota) = setup(Reply::Status(200, "OK"));

        FirmwareUpdate::start(&client, &ota).await.expect("accepted");

        assert_eq!(ota.state().stage, OtaStage::Init);
        assert_eq!(ota.state().percent, 0.0);
        assert_eq!(view.count(&OtaEvent::Hide), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_trigger_hides() {
        let (view, client, ota) = setup(Reply::Status(500, "no update"));

        let err = FirmwareUpdate::start(&client, &ota)
            .await
            .expect_err("rejected");

        assert!(format!("{err:#}").contains("status 500"));
        assert_eq!(view.count(&OtaEvent::Hide), 1);
    }
}
