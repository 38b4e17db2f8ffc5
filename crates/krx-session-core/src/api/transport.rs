//! Injectable HTTP layer.
//!
//! The session machinery never talks to `reqwest` directly; it goes through
//! `HttpClient` and `ClientFactory`, so hosts (and tests) can swap the client.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;

use crate::config::REQUEST_TIMEOUT_SECS;
use crate::error::SessionError;
use crate::session::CookieJar;

/// Body the portal returns instead of data once it has dropped the session
pub const LOGOUT_SENTINEL: &str = "LOGOUT";

/// A GET or POST to be sent through a session or a bare client
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub timeout: Duration,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            form: Vec::new(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.form
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Form field value, if present
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully read response. HTTP-level errors are not raised; callers inspect the status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).context("Failed to parse JSON response")
    }

    /// True when the portal signals that the session behind this request is gone
    pub fn is_logout_sentinel(&self) -> bool {
        self.body.trim() == LOGOUT_SENTINEL
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse>;
}

/// Creates clients: one bound to a session's cookie jar, or a bare one
pub trait ClientFactory: Send + Sync {
    fn session_client(&self, jar: Arc<CookieJar>) -> Result<Arc<dyn HttpClient>>;
    fn bare_client(&self) -> Result<Arc<dyn HttpClient>>;
}

/// `reqwest`-backed client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder
            .send()
            .await
            .map_err(SessionError::from)
            .with_context(|| format!("Failed to send {} request to {}", request.method, request.url))?;

        RawResponse::from_reqwest(response).await
    }
}

/// Default factory: plain `reqwest` clients, with the jar as cookie provider when bound.
///
/// The bare client is built once and shared by every clone of the factory,
/// so unauthenticated calls reuse one connection pool.
#[derive(Clone, Default)]
pub struct ReqwestFactory {
    bare: Arc<OnceLock<Arc<dyn HttpClient>>>,
}

impl ReqwestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn builder() -> reqwest::ClientBuilder {
        Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }
}

impl fmt::Debug for ReqwestFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestFactory")
            .field("bare_client_built", &self.bare.get().is_some())
            .finish()
    }
}

impl ClientFactory for ReqwestFactory {
    fn session_client(&self, jar: Arc<CookieJar>) -> Result<Arc<dyn HttpClient>> {
        let client = Self::builder()
            .cookie_provider(jar)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Arc::new(ReqwestClient::new(client)))
    }

    fn bare_client(&self) -> Result<Arc<dyn HttpClient>> {
        if let Some(client) = self.bare.get() {
            return Ok(client.clone());
        }
        let client = Self::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(client));
        Ok(self.bare.get_or_init(|| client).clone())
    }
}
