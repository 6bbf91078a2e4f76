// ── Topology cache ──
//
// Holds the last successfully parsed console topology and refreshes it on
// demand once its deadline has passed. Readers take a cheap `Arc` snapshot
// through `ArcSwapOption`; a refresh publishes a whole new snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use hmcgate_api::client::ATOM_ACCEPT;
use hmcgate_api::{Error, Fetched, RequestSpec, Session, Topology};

struct Snapshot {
    topology: Arc<Topology>,
    /// `None` when the interval overflows the clock: never refreshed.
    next_refresh: Option<Instant>,
    fetched_at: DateTime<Utc>,
}

/// Refresh-on-read cache of the console's managed system list.
///
/// Concurrent reads that all find the snapshot stale may each refresh; the
/// last successful store wins. A failed refresh leaves the previous snapshot
/// and its deadline untouched, so the next read retries.
pub struct TopologyCache {
    session: Arc<Session>,
    interval: Duration,
    snapshot: ArcSwapOption<Snapshot>,
}

impl TopologyCache {
    pub fn new(session: Arc<Session>, interval: Duration) -> Self {
        Self {
            session,
            interval,
            snapshot: ArcSwapOption::empty(),
        }
    }

    /// Current topology, refreshing first if it is missing or due.
    pub async fn get(&self) -> Result<Arc<Topology>, Error> {
        self.get_at(Instant::now()).await
    }

    /// Same as [`get`](Self::get) against an explicit clock reading.
    ///
    /// A snapshot stored at `now` is served until `now + interval`; a read at
    /// exactly that instant refreshes.
    pub async fn get_at(&self, now: Instant) -> Result<Arc<Topology>, Error> {
        if let Some(snapshot) = self.snapshot.load_full() {
            if snapshot.next_refresh.is_none_or(|due| now < due) {
                return Ok(Arc::clone(&snapshot.topology));
            }
            debug!("topology snapshot is due for refresh");
        }

        let body = match self.raw_console().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "topology refresh failed");
                return Err(e);
            }
        };
        let topology = Arc::new(hmcgate_api::xml::parse_management_console(&body)?);

        info!(
            console = %topology.console.name,
            systems = topology.devices.len(),
            "topology refreshed"
        );
        self.snapshot.store(Some(Arc::new(Snapshot {
            topology: Arc::clone(&topology),
            next_refresh: now.checked_add(self.interval),
            fetched_at: Utc::now(),
        })));
        Ok(topology)
    }

    /// Last successfully fetched topology, however old.
    pub fn cached(&self) -> Option<Arc<Topology>> {
        self.snapshot
            .load()
            .as_ref()
            .map(|snapshot| Arc::clone(&snapshot.topology))
    }

    /// Wall-clock time of the last successful refresh.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.load().as_ref().map(|s| s.fetched_at)
    }

    /// Fetch the console document verbatim. Does not touch the cache.
    pub async fn raw_console(&self) -> Result<String, Error> {
        let url = self.session.client().console_url()?;
        let request = RequestSpec::get(url).accept(ATOM_ACCEPT);
        match self.session.fetch(&request).await? {
            Fetched::Body(body) => Ok(String::from_utf8_lossy(&body).into_owned()),
            Fetched::NoContent => Err(Error::Protocol {
                message: "management console returned no content".into(),
                body: String::new(),
            }),
        }
    }
}
