// ── Quick status aggregation ──
//
// One report per call: resolve the topology, then fetch each managed
// system's quick status. A system whose fetch or decode fails is logged and
// left out; it never fails the report.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{StreamExt, stream};
use tracing::{debug, error, warn};

use hmcgate_api::client::JSON_ACCEPT;
use hmcgate_api::{DeviceRef, Fetched, QuickStatus, RequestSpec, Session, Topology};

use crate::error::CoreError;
use crate::model::{DeviceStatus, Report, millis};
use crate::topology::TopologyCache;

pub struct Aggregator {
    session: Arc<Session>,
    cache: Arc<TopologyCache>,
    console_name: String,
    concurrency: usize,
}

impl Aggregator {
    pub fn new(
        session: Arc<Session>,
        cache: Arc<TopologyCache>,
        console_name: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            session,
            cache,
            console_name: console_name.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Build a quick status report.
    ///
    /// Systems appear in topology order whatever the concurrency. Fails only
    /// when no topology can be produced at all.
    pub async fn build_report(&self) -> Result<Report, CoreError> {
        let started = Instant::now();
        let topology = self.topology().await?;

        let console = if self.console_name.is_empty() {
            topology.console.name.as_str()
        } else {
            self.console_name.as_str()
        };
        let total = topology.devices.len();

        let systems: Vec<DeviceStatus> = stream::iter(0..total)
            .map(|index| self.device_status(console, index, total, &topology.devices[index]))
            .buffered(self.concurrency)
            .filter_map(std::future::ready)
            .collect()
            .await;

        if systems.len() < total {
            warn!(
                reported = systems.len(),
                total, "quick status report is missing systems"
            );
        }

        Ok(Report {
            hmc: console.to_owned(),
            hmc_mtms: topology.console.mtms(),
            elapsed_ms: millis(started.elapsed()),
            systems,
        })
    }

    /// Fresh topology, or the last known one when a refresh fails.
    async fn topology(&self) -> Result<Arc<Topology>, CoreError> {
        match self.cache.get().await {
            Ok(topology) => Ok(topology),
            Err(e) => match self.cache.cached() {
                Some(stale) => {
                    warn!(error = %e, "serving stale topology");
                    Ok(stale)
                }
                None => Err(e.into()),
            },
        }
    }

    async fn device_status(
        &self,
        console: &str,
        index: usize,
        total: usize,
        device: &DeviceRef,
    ) -> Option<DeviceStatus> {
        let started = Instant::now();
        let url = match self.session.client().quick_status_url(&device.id) {
            Ok(url) => url,
            Err(e) => {
                error!(system = %device.id, error = %e, "cannot build quick status URL");
                return None;
            }
        };
        let request = RequestSpec::get(url).accept(JSON_ACCEPT);

        let body = match self.session.fetch(&request).await {
            Ok(Fetched::Body(body)) => body,
            Ok(Fetched::NoContent) => {
                warn!(system = %device.id, "quick status returned no content");
                return None;
            }
            Err(e) => {
                error!(system = %device.id, error = %e, "quick status fetch failed");
                return None;
            }
        };

        let quick = match QuickStatus::from_json(&body) {
            Ok(quick) => quick,
            Err(e) => {
                error!(system = %device.id, error = %e, "quick status decode failed");
                return None;
            }
        };

        let status = DeviceStatus::from_quick(&device.id, console, &quick, started.elapsed());
        debug!(
            system = %status.system_name,
            progress = format_args!("{}/{total}", index + 1),
            elapsed_ms = status.elapsed_ms,
            "quick status"
        );
        Some(status)
    }
}
