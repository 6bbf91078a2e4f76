// One-shot re-authentication retry
//
// A fetch is attempted once with the token captured before sending. An
// auth rejection (401/403) renews the session through `replace_if_stale`
// and retries exactly once; nothing else is ever retried.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::client::{RawResponse, RequestSpec};
use crate::error::Error;
use crate::session::Session;

/// Successful fetch outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// HTTP 200 with its body (possibly empty).
    Body(Bytes),
    /// HTTP 204: the resource exists but has nothing to report.
    NoContent,
}

impl Fetched {
    /// The body, or `None` for [`Fetched::NoContent`].
    pub fn into_body(self) -> Option<Bytes> {
        match self {
            Self::Body(body) => Some(body),
            Self::NoContent => None,
        }
    }
}

enum Attempt {
    Done(Fetched),
    AuthRejected(StatusCode),
    Failed(StatusCode),
}

fn classify(resp: RawResponse) -> Attempt {
    match resp.status {
        StatusCode::OK => Attempt::Done(Fetched::Body(resp.body)),
        StatusCode::NO_CONTENT => Attempt::Done(Fetched::NoContent),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Attempt::AuthRejected(resp.status),
        status => Attempt::Failed(status),
    }
}

impl Session {
    /// Fetch `request` with the session token, renewing the session at most
    /// once on an auth rejection.
    ///
    /// Each attempt builds a fresh request from `request`. At most two
    /// requests and one renewal happen per call.
    pub async fn fetch(&self, request: &RequestSpec) -> Result<Fetched, Error> {
        if !self.is_connected() {
            self.acquire().await.map_err(|e| match e {
                Error::Authentication { .. } => e,
                other => Error::Authentication {
                    message: format!("logon failed: {other}"),
                },
            })?;
        }

        let Some(token) = self.token() else {
            return Err(Error::Authentication {
                message: "session released before the request was sent".into(),
            });
        };

        let upstream = |status: StatusCode| Error::Upstream {
            status: status.as_u16(),
            url: request.url.to_string(),
        };

        let rejected = match classify(self.send(request, &token).await?) {
            Attempt::Done(fetched) => return Ok(fetched),
            Attempt::Failed(status) => return Err(upstream(status)),
            Attempt::AuthRejected(status) => status,
        };

        warn!(status = %rejected, url = %request.url, "request rejected, renewing session");
        let token = match self.replace_if_stale(&token).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "session renewal failed");
                return Err(upstream(rejected));
            }
        };

        match classify(self.send(request, &token).await?) {
            Attempt::Done(fetched) => Ok(fetched),
            Attempt::AuthRejected(status) | Attempt::Failed(status) => {
                debug!(%status, url = %request.url, "retry after renewal failed");
                Err(upstream(status))
            }
        }
    }

    async fn send(&self, request: &RequestSpec, token: &str) -> Result<RawResponse, Error> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.client().execute(request, Some(token)).await
    }
}
