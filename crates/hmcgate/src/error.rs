//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use hmcgate_config::ConfigError;
use hmcgate_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const UPSTREAM: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to console at {url}")]
    #[diagnostic(
        code(hmcgate::connection_failed),
        help(
            "Check that the console is reachable.\n\
             Reason: {reason}\n\
             Self-signed certificate? Try --tls-skip-verify (-k)."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Cannot listen on {addr}")]
    #[diagnostic(
        code(hmcgate::bind),
        help("Another process may own the port. Change it with --srv-port.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Console authentication failed: {message}")]
    #[diagnostic(
        code(hmcgate::auth_failed),
        help(
            "Verify hmc.user and the password.\n\
             Store a password with: hmcgate config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for console '{console}'")]
    #[diagnostic(
        code(hmcgate::no_credentials),
        help(
            "Set hmc.user in the config file or HMCGATE_HMC_USER, and the\n\
             password via HMCGATE_HMC_PASSWORD or: hmcgate config set-password"
        )
    )]
    NoCredentials { console: String },

    // ── Upstream ─────────────────────────────────────────────────────
    #[error("Console returned HTTP {status} for {url}")]
    #[diagnostic(code(hmcgate::upstream))]
    Upstream { status: u16, url: String },

    #[error("Unexpected console response: {message}")]
    #[diagnostic(code(hmcgate::protocol))]
    Protocol { message: String },

    #[error("Console request timed out after {seconds}s")]
    #[diagnostic(
        code(hmcgate::timeout),
        help("Increase hmc.timeout or check console responsiveness.")
    )]
    Timeout { seconds: u64 },

    #[error("Console did not answer {url} in time")]
    #[diagnostic(
        code(hmcgate::request_timeout),
        help("Increase hmc.timeout or check console responsiveness.")
    )]
    RequestTimeout { url: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hmcgate::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration file not found")]
    #[diagnostic(code(hmcgate::no_config), help("Expected at: {path}"))]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(hmcgate::config))]
    Config(Box<figment::Error>),

    #[error("Cannot load TLS material from {path}: {message}")]
    #[diagnostic(
        code(hmcgate::tls),
        help("server.tls_cert and server.tls_key must be readable PEM files.")
    )]
    Tls { path: String, message: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(hmcgate::keyring),
        help("Use HMCGATE_HMC_PASSWORD when no system keyring is available.")
    )]
    Keyring { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {message}")]
    #[diagnostic(code(hmcgate::render))]
    Render { message: String },
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Render {
            message: err.to_string(),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Bind { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::Keyring { .. } => {
                exit_code::AUTH
            }
            Self::Upstream { .. } | Self::Protocol { .. } => exit_code::UPSTREAM,
            Self::Timeout { .. } | Self::RequestTimeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::Config(_) | Self::Tls { .. } => {
                exit_code::USAGE
            }
            Self::Io(_) | Self::Render { .. } => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::RequestTimeout { url } => CliError::RequestTimeout { url },
            CoreError::Upstream { status, url } => CliError::Upstream { status, url },
            CoreError::Protocol { message } => CliError::Protocol { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { console } => CliError::NoCredentials { console },
            ConfigError::Serialization(e) => CliError::Render {
                message: e.to_string(),
            },
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Keyring(message) => CliError::Keyring { message },
        }
    }
}
