use anyhow::{Context, Result, ensure};
use log::trace;
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::{fmt, time::Duration};
use trait_variant::make;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn post_json(url: impl Into<String>, body: String, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
            timeout,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with the status and body attached unless the response is 2xx
    pub fn ensure_success(self, context_msg: &str) -> Result<Self> {
        ensure!(
            self.is_success(),
            "{context_msg} failed with status {} and body: {}",
            self.status,
            self.body
        );

        Ok(self)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).context("failed to parse response body as json")
    }
}

/// The one primitive every device call goes through
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait HttpTransport {
    /// Issue a request. Non-2xx statuses are not errors at this level,
    /// only failures to get any response are.
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;
        trace!("{method} {url}");

        let mut builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        }
        .timeout(timeout);

        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = body {
            builder = builder.body(body);
        }

        let res = builder
            .send()
            .await
            .context(format!("failed to send {method} request to {url}"))?;

        let status = res.status().as_u16();
        let body = res.text().await.context("failed to read response body")?;

        Ok(HttpResponse { status, body })
    }
}
