// ── Runtime gateway configuration ──
//
// These types describe *how* to reach the management console and how the
// aggregation behaves. They carry credential data and tuning, but never
// touch disk. The binary builds a `GatewayConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Default topology refresh interval.
pub const DEFAULT_TOPOLOGY_REFRESH: Duration = Duration::from_secs(10 * 60);

/// TLS verification strategy for the console connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification. Consoles usually ship a self-signed certificate.
    DangerAcceptInvalid,
}

/// Configuration for one management console.
///
/// Built by the binary, passed to `Gateway`; core never reads config files.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Console API root (e.g., `https://hmc1:12443`).
    pub url: Url,
    /// Display name reported as `hmc` in reports. Falls back to the name the
    /// console reports about itself when empty.
    pub console_name: String,
    pub username: String,
    pub password: SecretString,
    pub tls: TlsVerification,
    /// Per-request timeout for upstream calls.
    pub timeout: Duration,
    /// How long a fetched topology is served before the next read refreshes it.
    pub topology_refresh: Duration,
    /// Number of quick status fetches in flight at once. 1 = sequential.
    pub quick_status_concurrency: usize,
}

impl GatewayConfig {
    pub fn new(url: Url, username: impl Into<String>, password: SecretString) -> Self {
        Self {
            url,
            console_name: String::new(),
            username: username.into(),
            password,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            topology_refresh: DEFAULT_TOPOLOGY_REFRESH,
            quick_status_concurrency: 1,
        }
    }
}
