// Console session lifecycle
//
// Token-based logon (PUT), logoff (DELETE) and compare-and-renew. Every
// mutation path holds `slot` for its full duration, network call included,
// so two logon exchanges are never in flight at once. The token is written
// only after an exchange has completed, which keeps a dropped (cancelled)
// future from leaving a half-updated session behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::auth::{Credentials, LOGON_REQUEST_CONTENT_TYPE, LOGON_RESPONSE_ACCEPT};
use crate::client::{HmcClient, RequestSpec};
use crate::error::Error;
use crate::xml;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// The console session: one token, shared by every request task.
///
/// Construct once and hand out by `Arc`; there is no ambient instance.
pub struct Session {
    client: HmcClient,
    credentials: Credentials,
    /// Authoritative token. `Some` iff connected.
    slot: Mutex<Option<String>>,
    /// Published copy of `slot` for unlocked readers.
    current: ArcSwapOption<String>,
    state: watch::Sender<SessionState>,
    logons: AtomicU64,
    pub(crate) requests: AtomicU64,
}

/// Re-derives the published state from the token when dropped, so a
/// cancelled exchange never leaves `Connecting`/`Disconnecting` behind.
struct Settle<'a>(&'a Session);

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        let state = if self.0.current.load().is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        };
        self.0.state.send_replace(state);
    }
}

impl Session {
    pub fn new(client: HmcClient, credentials: Credentials) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            client,
            credentials,
            slot: Mutex::new(None),
            current: ArcSwapOption::empty(),
            state,
            logons: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &HmcClient {
        &self.client
    }

    /// Whether a token is currently held. Lock-free.
    pub fn is_connected(&self) -> bool {
        self.current.load().is_some()
    }

    /// Snapshot of the live token. Lock-free.
    pub fn token(&self) -> Option<Arc<String>> {
        self.current.load_full()
    }

    /// Subscribe to session state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Number of successful logon exchanges since construction.
    pub fn logon_count(&self) -> u64 {
        self.logons.load(Ordering::Relaxed)
    }

    /// Number of authenticated requests sent since construction.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    // ── Public lifecycle ─────────────────────────────────────────────

    /// Log on unless already connected.
    ///
    /// Idempotent: a connected session returns immediately without any
    /// network call.
    pub async fn acquire(&self) -> Result<(), Error> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        self.logon(&mut slot).await.map(drop)
    }

    /// Log off if connected.
    ///
    /// The local token is cleared even when the logoff exchange fails; the
    /// upstream error is returned for the caller to log.
    pub async fn release(&self) -> Result<(), Error> {
        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            return Ok(());
        }
        self.logoff(&mut slot).await
    }

    /// Renew the session if `observed` is still the live token.
    ///
    /// If another caller already renewed it, the live token is returned
    /// with no network call. Concurrent callers holding the same stale
    /// token therefore produce exactly one logoff + logon pair.
    pub async fn replace_if_stale(&self, observed: &str) -> Result<Arc<String>, Error> {
        let mut slot = self.slot.lock().await;

        if slot.as_deref().is_some_and(|live| live != observed) {
            debug!("session already renewed by another caller");
            return self.current.load_full().ok_or_else(|| Error::Authentication {
                message: "session token vanished during renewal".into(),
            });
        }

        if slot.is_some() {
            if let Err(e) = self.logoff(&mut slot).await {
                warn!(error = %e, "logoff of stale session failed, continuing with logon");
            }
        }

        let token = self.logon(&mut slot).await?;
        info!("session renewed");
        Ok(token)
    }

    // ── Exchanges (caller holds `slot`) ──────────────────────────────

    async fn logon(&self, slot: &mut Option<String>) -> Result<Arc<String>, Error> {
        self.state.send_replace(SessionState::Connecting);
        let _settle = Settle(self);

        let url = self.client.logon_url()?;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(LOGON_REQUEST_CONTENT_TYPE),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static(LOGON_RESPONSE_ACCEPT));
        let request = RequestSpec {
            method: Method::PUT,
            url,
            headers,
            body: Some(xml::logon_request(&self.credentials)),
        };

        debug!(url = %request.url, user = %self.credentials.username, "logging on");
        let resp = self.client.execute(&request, None).await?;

        if resp.status != StatusCode::OK {
            return Err(Error::Authentication {
                message: format!("logon failed (HTTP {}) at {}", resp.status, request.url),
            });
        }

        let token = Arc::new(xml::parse_logon_response(&resp.text())?);
        *slot = Some(token.as_ref().clone());
        self.current.store(Some(Arc::clone(&token)));
        self.logons.fetch_add(1, Ordering::Relaxed);

        debug!("logon successful");
        Ok(token)
    }

    async fn logoff(&self, slot: &mut Option<String>) -> Result<(), Error> {
        let Some(token) = slot.clone() else {
            return Ok(());
        };
        self.state.send_replace(SessionState::Disconnecting);
        let _settle = Settle(self);

        let result = self.logoff_exchange(&token).await;

        *slot = None;
        self.current.store(None);
        debug!("session released");
        result
    }

    async fn logoff_exchange(&self, token: &str) -> Result<(), Error> {
        let request = RequestSpec {
            method: Method::DELETE,
            url: self.client.logon_url()?,
            headers: HeaderMap::new(),
            body: None,
        };

        debug!(url = %request.url, "logging off");
        let resp = self.client.execute(&request, Some(token)).await?;

        match resp.status {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            status => Err(Error::Upstream {
                status: status.as_u16(),
                url: request.url.to_string(),
            }),
        }
    }
}
