use crate::{
    http_client::{HttpRequest, HttpResponse, HttpTransport},
    services::wifi::WifiScanReport,
    watchdog::CommandSink,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde_json::{Value, json};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::mpsc;
use url::Url;

/// Direct calls to the device's HTTP API
pub struct DeviceClient<T> {
    transport: Arc<T>,
    base: Url,
    timeout: Duration,
}

impl<T> Clone for DeviceClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            base: self.base.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: HttpTransport> DeviceClient<T> {
    const CMD_ENDPOINT: &str = "/api/cmd";
    const RESTART_ENDPOINT: &str = "/api/restart";
    const UPDATE_ENDPOINT: &str = "/api/update";
    const CONFIGURATION_ENDPOINT: &str = "/api/configuration";
    const WIFI_SCAN_START_ENDPOINT: &str = "/api/wifi-scan-start";
    const WIFI_SCAN_RESULTS_ENDPOINT: &str = "/api/wifi-scan-results";

    pub fn new(transport: Arc<T>, base: Url, timeout: Duration) -> Self {
        Self {
            transport,
            base,
            timeout,
        }
    }

    fn build_url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .context(format!("failed to build url for {path}"))
    }

    async fn get(&self, path: &str) -> Result<HttpResponse> {
        let url = self.build_url(path)?;
        debug!("GET {url}");

        self.transport
            .request(HttpRequest::get(url.as_str(), self.timeout))
            .await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<HttpResponse> {
        let url = self.build_url(path)?;
        debug!("POST {url}");

        self.transport
            .request(HttpRequest::post_json(
                url.as_str(),
                body.to_string(),
                self.timeout,
            ))
            .await
    }

    pub async fn restart(&self) -> Result<()> {
        info!("requesting device restart");
        self.get(Self::RESTART_ENDPOINT)
            .await?
            .ensure_success("GET /api/restart")?;
        Ok(())
    }

    /// Ask the device to start an OTA update. Progress only ever arrives over
    /// the push channel.
    pub async fn trigger_update(&self) -> Result<()> {
        info!("requesting firmware update");
        self.post_json(Self::UPDATE_ENDPOINT, &json!({}))
            .await?
            .ensure_success("POST /api/update")?;
        Ok(())
    }

    /// POST `{ "values": values }`. The status is left to the caller, only a
    /// transport failure is an error here.
    pub async fn upload_configuration(&self, values: Value) -> Result<HttpResponse> {
        self.post_json(Self::CONFIGURATION_ENDPOINT, &json!({ "values": values }))
            .await
    }

    pub async fn wifi_scan_start(&self) -> Result<()> {
        self.get(Self::WIFI_SCAN_START_ENDPOINT)
            .await?
            .ensure_success("GET /api/wifi-scan-start")?;
        Ok(())
    }

    pub async fn wifi_scan_results(&self) -> Result<WifiScanReport> {
        self.get(Self::WIFI_SCAN_RESULTS_ENDPOINT)
            .await?
            .ensure_success("GET /api/wifi-scan-results")?
            .json()
            .context("failed to parse wifi scan results")
    }

    /// Send one command and wait for the device's reply text
    pub async fn command(&self, command: &str) -> Result<String> {
        let url = self.command_url(command)?;
        debug!("GET {url}");

        let res = self
            .transport
            .request(HttpRequest::get(url.as_str(), self.timeout))
            .await?
            .ensure_success(&format!("command {command}"))?;

        Ok(res.body)
    }

    pub fn command_url(&self, command: &str) -> Result<Url> {
        let mut url = self.build_url(Self::CMD_ENDPOINT)?;
        url.query_pairs_mut().append_pair("cmd", command);
        Ok(url)
    }
}

/// `CommandSink` that queues `GET /api/cmd?cmd=...` and only logs the outcome.
///
/// Commands go out one at a time in the order they were sent, so a `STOP`
/// never overtakes the motion command it releases. The worker draining the
/// queue starts with the first command and ends when the sink is dropped.
pub struct HttpCommandSink<T> {
    client: DeviceClient<T>,
    queue: OnceLock<mpsc::UnboundedSender<String>>,
}

impl<T: HttpTransport + Send + Sync + 'static> HttpCommandSink<T> {
    pub fn new(client: DeviceClient<T>) -> Self {
        Self {
            client,
            queue: OnceLock::new(),
        }
    }

    fn queue(&self) -> &mpsc::UnboundedSender<String> {
        self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(drain_commands(self.client.clone(), rx));
            tx
        })
    }
}

impl<T: HttpTransport + Send + Sync + 'static> CommandSink for HttpCommandSink<T> {
    fn send_command(&self, command: &str) {
        if self.queue().send(command.to_string()).is_err() {
            warn!("dropping command {command}: command queue closed");
        }
    }
}

async fn drain_commands<T: HttpTransport>(
    client: DeviceClient<T>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(command) = rx.recv().await {
        let url = match client.command_url(&command) {
            Ok(url) => url,
            Err(e) => {
                warn!("dropping command {command}: {e:#}");
                continue;
            }
        };

        match client
            .transport
            .request(HttpRequest::get(url.as_str(), client.timeout))
            .await
        {
            Ok(res) if res.is_success() => debug!("{command} -> {}", res.body.trim()),
            Ok(res) => warn!("{command} rejected with status {}", res.status),
            Err(e) => warn!("{command} failed: {e:#}"),
        }
    }

    debug!("command queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::tests::{Reply, ScriptedTransport};
    use std::sync::Mutex;

    /// Motion commands take a while to answer, `STOP` answers at once
    #[derive(Default)]
    struct SlowMotionTransport {
        completed: Mutex<Vec<String>>,
    }

    impl HttpTransport for SlowMotionTransport {
        async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
            if !request.url.ends_with("cmd=STOP") {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }

            self.completed.lock().unwrap().push(request.url);

            Ok(HttpResponse {
                status: 200,
                body: "OK".to_string(),
            })
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> DeviceClient<ScriptedTransport> {
        DeviceClient::new(
            transport,
            Url::parse("http://192.168.4.1").unwrap(),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn test_command_url_is_encoded() {
        let client = client(Arc::new(ScriptedTransport::default()));
        let url = client.command_url("JW -1000").unwrap();

        assert_eq!(url.as_str(), "http://192.168.4.1/api/cmd?cmd=JW+-1000");
    }

    #[tokio::test]
    async fn test_trigger_update_rejected() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/api/update", Reply::Status(409, "busy")),
        );

        let err = client(transport.clone())
            .trigger_update()
            .await
            .expect_err("409 must fail");

        assert!(err.to_string().contains("status 409"));
        assert_eq!(transport.requests.lock().unwrap()[0].body.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_upload_wraps_values() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/api/configuration", Reply::Status(200, "{}")),
        );

        let res = client(transport.clone())
            .upload_configuration(json!({"system": {"webStatusUpdate": true}}))
            .await
            .unwrap();

        assert!(res.is_success());
        let body: Value =
            serde_json::from_str(transport.requests.lock().unwrap()[0].body.as_deref().unwrap())
                .unwrap();
        assert_eq!(body, json!({"values": {"system": {"webStatusUpdate": true}}}));
    }

    #[tokio::test]
    async fn test_command_sink_sends_get() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/api/cmd", Reply::Status(200, "OK")),
        );
        let sink = HttpCommandSink::new(client(transport.clone()));

        sink.send_command("STOP");
        tokio::task::yield_now().await;

        assert_eq!(
            transport.requested_urls(),
            vec!["http://192.168.4.1/api/cmd?cmd=STOP".to_string()]
        );
    }

    #[tokio::test]
    async fn test_command_returns_reply_text() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/api/cmd", Reply::Status(200, "OK\n")),
        );

        let reply = client(transport).command("JOG PING").await.unwrap();

        assert_eq!(reply, "OK\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_sink_keeps_send_order() {
        let transport = Arc::new(SlowMotionTransport::default());
        let sink = HttpCommandSink::new(DeviceClient::new(
            transport.clone(),
            Url::parse("http://192.168.4.1").unwrap(),
            Duration::from_secs(3),
        ));

        sink.send_command("JW 1000");
        sink.send_command("STOP");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            *transport.completed.lock().unwrap(),
            vec![
                "http://192.168.4.1/api/cmd?cmd=JW+1000".to_string(),
                "http://192.168.4.1/api/cmd?cmd=STOP".to_string(),
            ]
        );
    }
}
