// Console HTTP client
//
// Wraps `reqwest::Client` with console URL construction and session header
// injection. It never retries and never interprets status codes; the retry
// policy in `retry.rs` owns that.

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::auth::SESSION_HEADER;
use crate::error::Error;
use crate::transport::TransportConfig;

const LOGON_PATH: &str = "rest/api/web/Logon";
const CONSOLE_PATH: &str = "rest/api/uom/ManagementConsole";

/// Accept header for UOM Atom feeds.
pub const ATOM_ACCEPT: &str = "application/atom+xml; charset=UTF-8";

/// Accept header for the JSON quick views.
pub const JSON_ACCEPT: &str = "application/json";

/// A fully-formed request, rebuilt into a fresh `reqwest::Request` on every
/// attempt.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl RequestSpec {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Set the `Accept` header.
    pub fn accept(mut self, value: &'static str) -> Self {
        self.headers
            .insert(header::ACCEPT, HeaderValue::from_static(value));
        self
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl RawResponse {
    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Raw HTTP client for the management console REST API.
#[derive(Debug, Clone)]
pub struct HmcClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HmcClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the console API root, e.g. `https://hmc1:12443`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn join(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// `{base}/rest/api/web/Logon`
    pub fn logon_url(&self) -> Result<Url, Error> {
        self.join(LOGON_PATH)
    }

    /// `{base}/rest/api/uom/ManagementConsole`
    pub fn console_url(&self) -> Result<Url, Error> {
        self.join(CONSOLE_PATH)
    }

    /// `{base}/rest/api/uom/ManagedSystem/{id}/quick`
    pub fn quick_status_url(&self, system_id: &str) -> Result<Url, Error> {
        let mut url = self.join("rest/api/uom/ManagedSystem")?;
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .push(system_id)
            .push("quick");
        Ok(url)
    }

    // ── Request execution ────────────────────────────────────────────

    /// Execute one request, attaching the session token when given.
    ///
    /// Returns whatever status the console answered with.
    pub async fn execute(
        &self,
        request: &RequestSpec,
        token: Option<&str>,
    ) -> Result<RawResponse, Error> {
        debug!(method = %request.method, url = %request.url, "sending request");

        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .header(header::CONNECTION, "keep-alive");

        if let Some(token) = token {
            builder = builder.header(SESSION_HEADER, token);
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        trace!(%status, bytes = body.len(), "response received");
        Ok(RawResponse { status, body })
    }
}
