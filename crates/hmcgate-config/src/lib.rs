//! Configuration for the hmcgate service.
//!
//! TOML file, `HMCGATE_` environment overrides, credential resolution
//! (env + keyring + plaintext), and translation to
//! `hmcgate_core::GatewayConfig`. The binary layers its CLI flags on top.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
    value::{Uncased, UncasedStr},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hmcgate_core::{GatewayConfig, TlsVerification};

/// Environment variable consulted first for the console password.
pub const PASSWORD_ENV: &str = "HMCGATE_HMC_PASSWORD";

const KEYRING_SERVICE: &str = "hmcgate";
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for console '{console}'")]
    NoCredentials { console: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Minimum log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hmc: HmcConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            hmc: HmcConfig::default(),
        }
    }
}

/// Front-end listener and its optional basic auth.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_realm")]
    pub auth_realm: String,

    /// Basic auth user. Auth is enabled when both user and password are set.
    pub user: Option<String>,

    /// Basic auth password (plaintext; prefer `HMCGATE_SERVER_PASSWORD`).
    pub password: Option<String>,

    /// PEM certificate chain. HTTPS is served when both this and `tls_key` are set.
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for `tls_cert`.
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: default_port(),
            auth_realm: default_realm(),
            user: None,
            password: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// The upstream management console.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HmcConfig {
    /// Display name used in reports (e.g., "HMC1").
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_hmc_port")]
    pub port: u16,

    /// Full API root. Overrides `hostname` and `port`.
    pub url: Option<String>,

    pub user: Option<String>,

    /// Password (plaintext; prefer keyring or `HMCGATE_HMC_PASSWORD`).
    pub password: Option<String>,

    #[serde(default)]
    pub tls_skip_verify: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Per-request timeout, humantime format ("30s").
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Topology refresh interval, humantime format ("10m").
    #[serde(default = "default_refresh")]
    pub refresh_interval: String,

    #[serde(default = "default_concurrency")]
    pub quick_status_concurrency: usize,
}

impl Default for HmcConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: default_hostname(),
            port: default_hmc_port(),
            url: None,
            user: None,
            password: None,
            tls_skip_verify: false,
            ca_cert: None,
            timeout: default_timeout(),
            refresh_interval: default_refresh(),
            quick_status_concurrency: default_concurrency(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_addr() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9680
}
fn default_realm() -> String {
    "hmcgate".into()
}
fn default_hostname() -> String {
    "hmc.localhost".into()
}
fn default_hmc_port() -> u16 {
    12443
}
fn default_timeout() -> String {
    "30s".into()
}
fn default_refresh() -> String {
    "10m".into()
}
fn default_concurrency() -> usize {
    1
}

/// Front-end basic auth settings, present only when fully configured.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub realm: String,
    pub user: String,
    pub password: SecretString,
}

/// Front-end certificate and key paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTls {
    pub cert: PathBuf,
    pub key: PathBuf,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "hmcgate", "hmcgate").map_or_else(
        || PathBuf::from("hmcgate.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Layered sources: defaults, then the TOML file, then `HMCGATE_` env.
///
/// A missing file is not an error. `HMCGATE_HMC_USER` maps to `hmc.user`,
/// `HMCGATE_SERVER_PORT` to `server.port`, `HMCGATE_LOG_LEVEL` to `log_level`.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HMCGATE_").map(env_key))
}

fn env_key(key: &UncasedStr) -> Uncased<'_> {
    let key = key.as_str().to_ascii_lowercase();
    for section in ["hmc", "server"] {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{section}.{rest}").into();
        }
    }
    key.into()
}

/// Load the full Config from `path` (or the platform default) + environment.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    Ok(figment(&path).extract()?)
}

impl Config {
    /// TOML rendering with every password replaced.
    pub fn render_redacted(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        for secret in [&mut shown.hmc.password, &mut shown.server.password] {
            if secret.is_some() {
                *secret = Some(REDACTED.into());
            }
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Socket address for the HTTP front-end.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .addr
            .parse()
            .map_err(|_| invalid("server.addr", format!("not an IP address: {}", self.server.addr)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Basic auth, when both user and password are configured.
    pub fn basic_auth(&self) -> Option<BasicAuth> {
        let user = self.server.user.clone().filter(|u| !u.is_empty())?;
        let password = self.server.password.clone().filter(|p| !p.is_empty())?;
        Some(BasicAuth {
            realm: self.server.auth_realm.clone(),
            user,
            password: SecretString::from(password),
        })
    }

    /// HTTPS files for the front-end. Setting only one of the pair is an error.
    pub fn server_tls(&self) -> Result<Option<ServerTls>, ConfigError> {
        match (&self.server.tls_cert, &self.server.tls_key) {
            (Some(cert), Some(key)) => Ok(Some(ServerTls {
                cert: cert.clone(),
                key: key.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(invalid("server.tls_key", "required when server.tls_cert is set")),
            (None, Some(_)) => Err(invalid("server.tls_cert", "required when server.tls_key is set")),
        }
    }

    /// Name used for keyring entries and error messages.
    pub fn console_label(&self) -> &str {
        if self.hmc.name.is_empty() {
            &self.hmc.hostname
        } else {
            &self.hmc.name
        }
    }

    /// Console API root: `hmc.url` if set, else `https://{hostname}:{port}`.
    pub fn hmc_url(&self) -> Result<url::Url, ConfigError> {
        let raw = self
            .hmc
            .url
            .clone()
            .unwrap_or_else(|| format!("https://{}:{}", self.hmc.hostname, self.hmc.port));
        let url: url::Url = raw
            .parse()
            .map_err(|_| invalid("hmc.url", format!("invalid URL: {raw}")))?;
        match url.scheme() {
            "https" | "http" => Ok(url),
            other => Err(invalid("hmc.url", format!("unsupported scheme '{other}'"))),
        }
    }

    /// Build a `GatewayConfig` from the loaded configuration.
    pub fn to_gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let url = self.hmc_url()?;
        let (username, password) = resolve_credentials(self)?;

        let tls = if self.hmc.tls_skip_verify {
            TlsVerification::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.hmc.ca_cert {
            TlsVerification::CustomCa(ca_path.clone())
        } else {
            TlsVerification::SystemDefaults
        };

        if self.hmc.quick_status_concurrency == 0 {
            return Err(invalid("hmc.quick_status_concurrency", "must be at least 1"));
        }

        let mut config = GatewayConfig::new(url, username, password);
        config.console_name = self.hmc.name.clone();
        config.tls = tls;
        config.timeout = parse_duration("hmc.timeout", &self.hmc.timeout)?;
        config.topology_refresh = parse_duration("hmc.refresh_interval", &self.hmc.refresh_interval)?;
        config.quick_status_concurrency = self.hmc.quick_status_concurrency;
        Ok(config)
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| invalid(field, format!("'{value}': {e}")))
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve console credentials.
///
/// Password order: `HMCGATE_HMC_PASSWORD`, the system keyring entry
/// `hmcgate` / `{console}/password`, then plaintext in the config.
pub fn resolve_credentials(config: &Config) -> Result<(String, SecretString), ConfigError> {
    let console = config.console_label();
    let username = config
        .hmc
        .user
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ConfigError::NoCredentials {
            console: console.into(),
        })?;

    // 1. Env var
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok((username, SecretString::from(pw)));
        }
    }

    // 2. Keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{console}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Ok((username, SecretString::from(pw)));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = config.hmc.password {
        return Ok((username, SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        console: console.into(),
    })
}

/// Store the console password in the system keyring.
pub fn store_password(config: &Config, password: &SecretString) -> Result<(), ConfigError> {
    use secrecy::ExposeSecret;

    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{}/password", config.console_label()))
        .map_err(|e| ConfigError::Keyring(e.to_string()))?;
    entry
        .set_password(password.expose_secret())
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn from_toml(body: &str) -> Config {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(file.path()))
            .extract()
            .unwrap()
    }

    #[test]
    fn defaults_without_file() {
        let config = from_toml("");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.server.addr, "0.0.0.0");
        assert_eq!(config.server.port, 9680);
        assert_eq!(config.hmc.port, 12443);
        assert_eq!(config.hmc.refresh_interval, "10m");
        assert_eq!(
            config.listen_addr().unwrap(),
            "0.0.0.0:9680".parse::<SocketAddr>().unwrap()
        );
        assert!(config.basic_auth().is_none());
    }

    #[test]
    fn file_values_reach_gateway_config() {
        let config = from_toml(
            r#"
            [hmc]
            name = "HMC1"
            hostname = "hmc1.example.net"
            user = "hscroot"
            password = "abc123"
            tls_skip_verify = true
            timeout = "45s"
            refresh_interval = "5m"
            quick_status_concurrency = 4
            "#,
        );

        let gateway = config.to_gateway_config().unwrap();
        assert_eq!(gateway.url.as_str(), "https://hmc1.example.net:12443/");
        assert_eq!(gateway.console_name, "HMC1");
        assert_eq!(gateway.username, "hscroot");
        assert_eq!(gateway.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(gateway.timeout, Duration::from_secs(45));
        assert_eq!(gateway.topology_refresh, Duration::from_secs(300));
        assert_eq!(gateway.quick_status_concurrency, 4);
    }

    #[test]
    fn explicit_url_wins_over_hostname() {
        let config = from_toml(
            r#"
            [hmc]
            url = "http://127.0.0.1:8443"
            user = "hscroot"
            password = "pw"
            "#,
        );
        assert_eq!(config.hmc_url().unwrap().as_str(), "http://127.0.0.1:8443/");
    }

    #[test]
    fn bad_values_are_validation_errors() {
        let config = from_toml(
            r#"
            [hmc]
            user = "hscroot"
            password = "pw"
            refresh_interval = "soon"
            "#,
        );
        let err = config.to_gateway_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "hmc.refresh_interval"));

        let config = from_toml("[hmc]\nurl = \"ftp://hmc\"\n");
        assert!(config.hmc_url().is_err());
    }

    #[test]
    fn missing_user_is_no_credentials() {
        let config = from_toml("[hmc]\nname = \"HMC9\"\n");
        let err = config.to_gateway_config().unwrap_err();
        assert_eq!(err.to_string(), "no credentials configured for console 'HMC9'");
    }

    #[test]
    fn basic_auth_needs_user_and_password() {
        let config = from_toml("[server]\nuser = \"admin\"\n");
        assert!(config.basic_auth().is_none());

        let config = from_toml("[server]\nuser = \"admin\"\npassword = \"s3cret\"\n");
        let auth = config.basic_auth().unwrap();
        assert_eq!(auth.realm, "hmcgate");
        assert_eq!(auth.password.expose_secret(), "s3cret");
    }

    #[test]
    fn server_tls_needs_cert_and_key() {
        assert_eq!(from_toml("").server_tls().unwrap(), None);

        let config = from_toml("[server]\ntls_cert = \"/etc/hmcgate/cert.pem\"\ntls_key = \"/etc/hmcgate/key.pem\"\n");
        assert_eq!(
            config.server_tls().unwrap(),
            Some(ServerTls {
                cert: PathBuf::from("/etc/hmcgate/cert.pem"),
                key: PathBuf::from("/etc/hmcgate/key.pem"),
            })
        );

        let config = from_toml("[server]\ntls_cert = \"/etc/hmcgate/cert.pem\"\n");
        let err = config.server_tls().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "server.tls_key"));
    }

    #[test]
    fn redacted_rendering_hides_passwords() {
        let config = from_toml("[hmc]\nuser = \"hscroot\"\npassword = \"abc123\"\n");
        let shown = config.render_redacted().unwrap();
        assert!(shown.contains(REDACTED));
        assert!(!shown.contains("abc123"));
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "hmcgate.toml",
                r#"
                log_level = "warn"
                [hmc]
                hostname = "from-file"
                user = "hscroot"
                password = "file-pw"
                "#,
            )?;
            jail.set_env("HMCGATE_HMC_HOSTNAME", "from-env");
            jail.set_env("HMCGATE_SERVER_PORT", "9999");
            jail.set_env("HMCGATE_LOG_LEVEL", "debug");
            jail.set_env(PASSWORD_ENV, "env-pw");

            let config = load_config(Some(Path::new("hmcgate.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.hmc.hostname, "from-env");
            assert_eq!(config.server.port, 9999);
            assert_eq!(config.log_level, "debug");

            let (_, password) = resolve_credentials(&config).map_err(|e| e.to_string())?;
            assert_eq!(password.expose_secret(), "env-pw");
            Ok(())
        });
    }
}
