// ── Report domain types ──
//
// Produced fresh per request and serialized straight to the HTTP body.
// Field names follow the gateway's established JSON contract.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use hmcgate_api::{QuickStatus, SessionState};

/// Whole milliseconds, saturating.
pub(crate) fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Status of one managed system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub uuid: String,
    /// Console display name.
    pub hmc: String,
    pub mtms: String,
    #[serde(rename = "systemname")]
    pub system_name: String,
    pub state: String,
    /// Attention LED.
    pub led: bool,
    #[serde(rename = "rfc")]
    pub reference_code: String,
    #[serde(rename = "mrfc")]
    pub merged_reference_code: String,
    pub location: String,
    /// Fetch time in milliseconds.
    #[serde(rename = "elapsed")]
    pub elapsed_ms: u64,
}

impl DeviceStatus {
    pub fn from_quick(uuid: &str, console: &str, quick: &QuickStatus, elapsed: Duration) -> Self {
        Self {
            uuid: uuid.to_owned(),
            hmc: console.to_owned(),
            mtms: quick.mtms(),
            system_name: quick.system_name().to_owned(),
            state: quick.state().to_owned(),
            led: quick.attention_led(),
            reference_code: quick.reference_code().to_owned(),
            merged_reference_code: quick.merged_reference_code().to_owned(),
            location: quick.location().to_owned(),
            elapsed_ms: millis(elapsed),
        }
    }
}

/// One aggregation pass over the console's managed systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// Console display name.
    pub hmc: String,
    /// Console identity as `TYPE-MODEL*SERIAL`.
    pub hmc_mtms: String,
    /// Total build time in milliseconds.
    #[serde(rename = "elapsed")]
    pub elapsed_ms: u64,
    pub systems: Vec<DeviceStatus>,
}

/// Connection state as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl From<SessionState> for ConnectionState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Disconnected => Self::Disconnected,
            SessionState::Connecting => Self::Connecting,
            SessionState::Connected => Self::Connected,
            SessionState::Disconnecting => Self::Disconnecting,
        }
    }
}

/// Gateway health and request counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    #[serde(rename = "server_status")]
    pub server: String,
    #[serde(rename = "hmc_connection")]
    pub connection: String,
    pub logon_requests: u64,
    pub url_requests: u64,
    #[serde(rename = "mgmconsole_requests")]
    pub console_requests: u64,
    #[serde(rename = "quick_mgms_requests")]
    pub quick_requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology_updated: Option<DateTime<Utc>>,
}
