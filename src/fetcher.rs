//! Multi-candidate HTTP resolver
//!
//! Tries an ordered list of endpoints and returns the first JSON payload that
//! comes back within the timeout. Every failure is logged and skipped, the
//! caller only ever sees "a payload" or "nothing".

use crate::{
    config::PageOrigin,
    http_client::{HttpMethod, HttpRequest, HttpTransport},
};
use log::{debug, trace};
use serde_json::Value;
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::time;
use url::Url;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Append a unique `t=<millis>` query parameter to defeat caches
    pub bust_cache: bool,
}

impl FetchOptions {
    pub fn no_store() -> Self {
        Self {
            headers: vec![("Cache-Control".to_string(), "no-store".to_string())],
            bust_cache: true,
            ..Default::default()
        }
    }

    pub fn bust_cache() -> Self {
        Self {
            bust_cache: true,
            ..Default::default()
        }
    }
}

pub struct MultiSourceFetcher<T> {
    transport: Arc<T>,
    origin: PageOrigin,
    timeout: Duration,
}

impl<T> Clone for MultiSourceFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            origin: self.origin.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: HttpTransport> MultiSourceFetcher<T> {
    pub fn new(transport: Arc<T>, origin: PageOrigin, timeout: Duration) -> Self {
        Self {
            transport,
            origin,
            timeout,
        }
    }

    pub fn origin(&self) -> &PageOrigin {
        &self.origin
    }

    /// Fetch the first successful payload among `candidates`
    ///
    /// # Arguments
    /// * `candidates` - absolute URLs or origin-relative paths, preferred first
    /// * `options` - method, extra headers and cache busting
    ///
    /// # Returns
    /// The `values` member of the payload if it has one, else the payload.
    /// `None` when every candidate failed.
    pub async fn fetch(&self, candidates: &[String], options: &FetchOptions) -> Option<Value> {
        for candidate in candidates {
            let Some(mut url) = self.resolve(candidate) else {
                continue;
            };

            if options.bust_cache {
                url.query_pairs_mut()
                    .append_pair("t", &unix_millis().to_string());
            }

            let request = HttpRequest {
                method: options.method,
                url: url.to_string(),
                headers: options.headers.clone(),
                body: options.body.clone(),
                timeout: self.timeout,
            };

            let res = match time::timeout(self.timeout, self.transport.request(request)).await {
                Ok(Ok(res)) => res,
                Ok(Err(e)) => {
                    debug!("fetch {url} failed: {e:#}");
                    continue;
                }
                Err(_) => {
                    debug!("fetch {url} timed out after {:?}", self.timeout);
                    continue;
                }
            };

            if !res.is_success() {
                debug!("fetch {url} failed with status {}", res.status);
                continue;
            }

            match serde_json::from_str::<Value>(&res.body) {
                Ok(payload) => {
                    trace!("fetch {url} succeeded");
                    return Some(unwrap_values(payload));
                }
                Err(e) => debug!("fetch {url} returned invalid json: {e}"),
            }
        }

        None
    }

    /// Resolve a candidate against the origin. Relative paths are unreachable
    /// from a local file and are dropped.
    fn resolve(&self, candidate: &str) -> Option<Url> {
        if let Ok(url) = Url::parse(candidate) {
            return Some(url);
        }

        let Some(base) = self.origin.base_url() else {
            trace!("skipping relative candidate {candidate} on local file origin");
            return None;
        };

        match base.join(candidate) {
            Ok(url) => Some(url),
            Err(e) => {
                debug!("failed to resolve candidate {candidate}: {e}");
                None
            }
        }
    }
}

fn unwrap_values(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) if matches!(map.get("values"), Some(Value::Object(_) | Value::Array(_))) => {
            map.remove("values").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::http_client::HttpResponse;
    use anyhow::{Result, bail};
    use serde_json::json;
    use std::{collections::HashMap, sync::Mutex};

    #[derive(Clone)]
    pub(crate) enum Reply {
        Status(u16, &'static str),
        Fail,
        Hang,
    }

    /// Scripted transport keyed by URL path, records every requested URL
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        replies: Mutex<HashMap<String, Vec<Reply>>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn reply(self, url_prefix: &str, reply: Reply) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(url_prefix.to_string())
                .or_default()
                .push(reply);
            self
        }

        pub(crate) fn requested_urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.url.clone())
                .collect()
        }
    }

    impl HttpTransport for ScriptedTransport {
        async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.clone());

            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let next = replies
                    .iter_mut()
                    .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                    .and_then(|(_, queue)| {
                        if queue.len() > 1 {
                            Some(queue.remove(0))
                        } else {
                            queue.first().cloned()
                        }
                    });
                next
            };

            match reply {
                Some(Reply::Status(status, body)) => Ok(HttpResponse {
                    status,
                    body: body.to_string(),
                }),
                Some(Reply::Hang) => std::future::pending().await,
                Some(Reply::Fail) | None => bail!("connection refused"),
            }
        }
    }

    fn device_origin() -> PageOrigin {
        PageOrigin::Device(Url::parse("http://192.168.4.1").unwrap())
    }

    fn candidates() -> Vec<String> {
        vec![
            "/api/status".to_string(),
            "http://kbwinder-6b33.local/api/status".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_first_success_stops_resolution() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/", Reply::Status(200, r#"{"freeHeap":1000}"#))
                .reply("http://kbwinder-6b33.local/", Reply::Status(200, r#"{"freeHeap":2}"#)),
        );
        let fetcher =
            MultiSourceFetcher::new(transport.clone(), device_origin(), Duration::from_secs(3));

        let payload = fetcher.fetch(&candidates(), &FetchOptions::default()).await;

        assert_eq!(payload, Some(json!({"freeHeap": 1000})));
        assert_eq!(
            transport.requested_urls(),
            vec!["http://192.168.4.1/api/status".to_string()]
        );
    }

    #[tokio::test]
    async fn test_falls_through_errors_and_bad_status() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/", Reply::Status(503, "busy"))
                .reply("http://kbwinder-6b33.local/", Reply::Status(200, r#"{"uptime":5}"#)),
        );
        let fetcher =
            MultiSourceFetcher::new(transport.clone(), device_origin(), Duration::from_secs(3));

        let payload = fetcher.fetch(&candidates(), &FetchOptions::default()).await;

        assert_eq!(payload, Some(json!({"uptime": 5})));
        assert_eq!(transport.requested_urls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_candidate_is_abandoned_after_timeout() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/", Reply::Hang)
                .reply("http://kbwinder-6b33.local/", Reply::Status(200, r#"{"uptime":7}"#)),
        );
        let fetcher =
            MultiSourceFetcher::new(transport.clone(), device_origin(), Duration::from_secs(3));

        let started = time::Instant::now();
        let payload = fetcher.fetch(&candidates(), &FetchOptions::default()).await;

        assert_eq!(payload, Some(json!({"uptime": 7})));
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_all_candidates_failing_yields_none() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://192.168.4.1/", Reply::Fail)
                .reply("http://kbwinder-6b33.local/", Reply::Status(200, "not json")),
        );
        let fetcher =
            MultiSourceFetcher::new(transport.clone(), device_origin(), Duration::from_secs(3));

        assert_eq!(fetcher.fetch(&candidates(), &FetchOptions::default()).await, None);
    }

    #[tokio::test]
    async fn test_local_file_drops_relative_candidates() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply("http://kbwinder-6b33.local/", Reply::Status(200, r#"{"uptime":1}"#)),
        );
        let fetcher =
            MultiSourceFetcher::new(transport.clone(), PageOrigin::LocalFile, Duration::from_secs(3));

        let payload = fetcher.fetch(&candidates(), &FetchOptions::default()).await;

        assert_eq!(payload, Some(json!({"uptime": 1})));
        assert_eq!(
            transport.requested_urls(),
            vec!["http://kbwinder-6b33.local/api/status".to_string()]
        );
    }

    #[tokio::test]
    async fn test_values_wrapper_is_unwrapped() {
        let transport = Arc::new(ScriptedTransport::default().reply(
            "http://192.168.4.1/",
            Reply::Status(200, r#"{"values":{"system":{"webStatusUpdate":true}}}"#),
        ));
        let fetcher =
            MultiSourceFetcher::new(transport, device_origin(), Duration::from_secs(3));

        let payload = fetcher
            .fetch(&["/api/configuration".to_string()], &FetchOptions::default())
            .await;

        assert_eq!(payload, Some(json!({"system": {"webStatusUpdate": true}})));
    }

    #[test]
    fn test_scalar_values_member_is_not_unwrapped() {
        let payload = json!({"values": 3, "other": true});
        assert_eq!(unwrap_values(payload.clone()), payload);
    }

    #[tokio::test]
    async fn test_bust_cache_adds_query() {
        let transport = Arc::new(
            ScriptedTransport::default().reply("http://192.168.4.1/", Reply::Status(200, "{}")),
        );
        let fetcher =
            MultiSourceFetcher::new(transport.clone(), device_origin(), Duration::from_secs(3));

        fetcher
            .fetch(&["/api/status".to_string()], &FetchOptions::no_store())
            .await;

        let requests = transport.requests.lock().unwrap();
        assert!(requests[0].url.starts_with("http://192.168.4.1/api/status?t="));
        assert!(
            requests[0]
                .headers
                .contains(&("Cache-Control".to_string(), "no-store".to_string()))
        );
    }
}
