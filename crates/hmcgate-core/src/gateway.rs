// ── Gateway facade ──
//
// Owns the session, topology cache and aggregator for one console and is
// the only type the HTTP front-end talks to. Cheap to clone.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use hmcgate_api::{Credentials, HmcClient, Session, SessionState, TlsMode, TransportConfig};

use crate::aggregate::Aggregator;
use crate::config::{GatewayConfig, TlsVerification};
use crate::error::CoreError;
use crate::model::{ConnectionState, GatewayStatus, Report};
use crate::topology::TopologyCache;

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    session: Arc<Session>,
    cache: Arc<TopologyCache>,
    aggregator: Aggregator,
    console_requests: AtomicU64,
    quick_requests: AtomicU64,
}

impl Gateway {
    /// Build a gateway from config. No network traffic until the first call.
    pub fn new(config: GatewayConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_to_transport(&config.tls),
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let client = HmcClient::new(config.url.clone(), &transport)?;
        let credentials = Credentials::new(config.username.clone(), config.password.clone());
        Ok(Self::with_session(config, Session::new(client, credentials)))
    }

    /// Build a gateway around an existing session.
    pub fn with_session(config: GatewayConfig, session: Session) -> Self {
        let session = Arc::new(session);
        let cache = Arc::new(TopologyCache::new(
            Arc::clone(&session),
            config.topology_refresh,
        ));
        let aggregator = Aggregator::new(
            Arc::clone(&session),
            Arc::clone(&cache),
            config.console_name.clone(),
            config.quick_status_concurrency,
        );
        Self {
            inner: Arc::new(GatewayInner {
                config,
                session,
                cache,
                aggregator,
                console_requests: AtomicU64::new(0),
                quick_requests: AtomicU64::new(0),
            }),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn topology_cache(&self) -> &Arc<TopologyCache> {
        &self.inner.cache
    }

    /// Log on to the console. Idempotent.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.session.acquire().await?;
        info!(url = %self.inner.config.url, "connected to console");
        Ok(())
    }

    /// Log off. A failed logoff still leaves the gateway disconnected.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        match self.inner.session.release().await {
            Ok(()) => {
                info!("console session released");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "console logoff failed");
                Err(e.into())
            }
        }
    }

    /// Aggregated quick status of every managed system.
    pub async fn quick_status(&self) -> Result<Report, CoreError> {
        self.inner.quick_requests.fetch_add(1, Ordering::Relaxed);
        self.inner.aggregator.build_report().await
    }

    /// The console's management console document, verbatim.
    pub async fn management_console_xml(&self) -> Result<String, CoreError> {
        self.inner.console_requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.inner.cache.raw_console().await?)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.session.state().into()
    }

    /// Follow connection state transitions as they are published.
    pub fn watch_connection(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            server: "OK".into(),
            connection: self.connection_state().to_string(),
            logon_requests: self.inner.session.logon_count(),
            url_requests: self.inner.session.request_count(),
            console_requests: self.inner.console_requests.load(Ordering::Relaxed),
            quick_requests: self.inner.quick_requests.load(Ordering::Relaxed),
            topology_updated: self.inner.cache.refreshed_at(),
        }
    }
}

/// Run `fut` under a deadline. Dropping the future on expiry cancels any
/// upstream request it had in flight.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| CoreError::Timeout {
            timeout_secs: deadline.as_secs(),
        })?
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}
