use futures_util::SinkExt;
use serde_json::json;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use url::Url;
use winder_link::{
    config::PageOrigin,
    fetcher::MultiSourceFetcher,
    http_client::ReqwestTransport,
    live::{LiveDispatcher, LiveStateChannel},
    ota::{OtaStage, OtaStateMachine},
    retry::FixedDelay,
    session::Session,
    status::{LiveStatusSnapshot, NetworkTransition},
    view::{OtaView, StatusView},
};

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<LiveStatusSnapshot>>,
    logs: Mutex<Vec<String>>,
    ota: Mutex<Vec<(OtaStage, f64)>>,
}

impl StatusView for Recorder {
    fn render_status(&self, snapshot: &LiveStatusSnapshot) {
        self.statuses.lock().unwrap().push(snapshot.clone());
    }

    fn append_log(&self, _level: &str, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }

    fn network_transition(&self, _transition: &NetworkTransition) {}
}

impl OtaView for Recorder {
    fn render_ota_progress(&self, stage: OtaStage, percent: f64, _message: &str) {
        self.ota.lock().unwrap().push((stage, percent));
    }

    fn hide_ota(&self) {}

    fn reload(&self) {}
}

/// Serves one batch of frames per connection, closing after every batch but
/// the last.
async fn start_mock_push_server(
    batches: Vec<Vec<String>>,
    ready_tx: oneshot::Sender<u16>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;

    // Signal that the server is ready
    let _ = ready_tx.send(listener.local_addr()?.port());

    let last = batches.len().saturating_sub(1);
    let mut held = Vec::new();

    for (i, batch) in batches.into_iter().enumerate() {
        let (stream, _) = listener.accept().await?;
        let mut ws = accept_async(stream).await?;

        for frame in batch {
            ws.send(Message::Text(frame)).await?;
        }

        if i == last {
            held.push(ws);
        } else {
            ws.close(None).await?;
        }
    }

    // Keep the last connection open until the test ends
    std::future::pending::<()>().await;
    drop(held);
    Ok(())
}

/// Accepts TCP connections and holds them open without ever answering the
/// WebSocket upgrade.
async fn start_silent_server(
    accepted: Arc<AtomicUsize>,
    ready_tx: oneshot::Sender<u16>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;

    // Signal that the server is ready
    let _ = ready_tx.send(listener.local_addr()?.port());

    let mut held = Vec::new();

    loop {
        let (stream, _) = listener.accept().await?;
        accepted.fetch_add(1, Ordering::SeqCst);
        held.push(stream);
    }
}

fn channel_for(
    port: u16,
    recorder: Arc<Recorder>,
    session: Arc<Session>,
    reconnect_delay: Duration,
) -> LiveStateChannel<ReqwestTransport, Recorder, Recorder> {
    let origin = Url::parse(&format!("http://127.0.0.1:{port}")).expect("valid url");
    let push_url = Url::parse(&format!("ws://127.0.0.1:{port}/ws")).expect("valid url");

    let ota = Arc::new(OtaStateMachine::new(
        recorder.clone(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    ));
    let dispatcher = Arc::new(LiveDispatcher::new(session.clone(), recorder, ota));
    let fetcher = MultiSourceFetcher::new(
        Arc::new(ReqwestTransport::default()),
        PageOrigin::Device(origin),
        Duration::from_secs(3),
    );

    LiveStateChannel::new(
        fetcher,
        dispatcher,
        session,
        push_url,
        vec!["/api/status".to_string()],
        Arc::new(FixedDelay::forever(reconnect_delay)),
        Duration::from_secs(10),
        Duration::from_secs(5),
    )
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn test_push_frames_survive_reconnect() {
    let first = vec![
        json!({"type": "status", "freeHeap": 81234, "uptime": 61}).to_string(),
        "not json".to_string(),
        json!({"type": "log", "level": "info", "message": "[MOTOR] speed: 120"}).to_string(),
    ];
    let second = vec![
        json!({"type": "status", "wifiRSSI": -58}).to_string(),
        json!({"type": "ota", "stage": "BIN_START", "progress": 42.0}).to_string(),
    ];

    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = start_mock_push_server(vec![first, second], ready_tx).await;
    });
    let port = ready_rx.await.expect("server failed to start");

    let recorder = Arc::new(Recorder::default());
    let session = Arc::new(Session::new());
    let channel = channel_for(
        port,
        recorder.clone(),
        session.clone(),
        Duration::from_millis(50),
    );

    assert!(channel.connect());

    wait_for(|| !recorder.ota.lock().unwrap().is_empty()).await;

    assert_eq!(recorder.ota.lock().unwrap()[0], (OtaStage::BinStart, 42.0));
    assert_eq!(
        recorder.logs.lock().unwrap().as_slice(),
        ["[MOTOR] speed: 120".to_string()]
    );

    let status = session.status();
    assert_eq!(status.free_heap(), Some(81234));
    assert_eq!(status.wifi_rssi(), Some(-58));
    assert_eq!(status.uptime(), Some(61));
    assert_eq!(status.get("speed"), Some(&json!("120")));
    assert!(!session.is_stale(Duration::from_secs(5)));

    channel.shutdown();
    assert!(!channel.is_connected_or_retrying());
}

#[tokio::test]
async fn test_stalled_handshake_is_retried() {
    let accepted = Arc::new(AtomicUsize::new(0));

    let (ready_tx, ready_rx) = oneshot::channel();
    let counter = accepted.clone();
    tokio::spawn(async move {
        let _ = start_silent_server(counter, ready_tx).await;
    });
    let port = ready_rx.await.expect("server failed to start");

    let recorder = Arc::new(Recorder::default());
    let session = Arc::new(Session::new());
    let channel = channel_for(port, recorder.clone(), session, Duration::from_millis(100))
        .with_handshake_timeout(Duration::from_millis(200));

    assert!(channel.connect());

    wait_for(|| accepted.load(Ordering::SeqCst) >= 3).await;

    assert!(channel.is_connected_or_retrying());
    assert!(recorder.statuses.lock().unwrap().is_empty());

    channel.shutdown();
    assert!(!channel.is_connected_or_retrying());
}
