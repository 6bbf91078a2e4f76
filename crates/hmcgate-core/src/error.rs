// ── Core error types ──
//
// User-facing errors from hmcgate-core. The `From<hmcgate_api::Error>` impl
// translates transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to console at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// An operation deadline expired.
    #[error("Console request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// A single upstream request hit the transport timeout (`hmc.timeout`).
    #[error("Console did not answer {url} within the request timeout")]
    RequestTimeout { url: String },

    // ── Upstream errors ──────────────────────────────────────────────
    #[error("Console returned HTTP {status} for {url}")]
    Upstream { status: u16, url: String },

    #[error("Unexpected console response: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Short machine-friendly label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection",
            Self::AuthenticationFailed { .. } => "auth",
            Self::Timeout { .. } | Self::RequestTimeout { .. } => "timeout",
            Self::Upstream { .. } => "upstream",
            Self::Protocol { .. } => "protocol",
            Self::Config { .. } => "config",
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hmcgate_api::Error> for CoreError {
    fn from(err: hmcgate_api::Error) -> Self {
        match err {
            hmcgate_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            hmcgate_api::Error::Protocol { message, body: _ } => CoreError::Protocol { message },
            hmcgate_api::Error::Upstream { status, url } => CoreError::Upstream { status, url },
            hmcgate_api::Error::Transport(ref e) => {
                let url = e
                    .url()
                    .map_or_else(|| "<unknown>".into(), ToString::to_string);
                if e.is_timeout() {
                    CoreError::RequestTimeout { url }
                } else {
                    CoreError::ConnectionFailed {
                        url,
                        reason: e.to_string(),
                    }
                }
            }
            hmcgate_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            hmcgate_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_core_variants() {
        let err: CoreError = hmcgate_api::Error::Upstream {
            status: 503,
            url: "https://hmc/x".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Upstream { status: 503, .. }));
        assert_eq!(err.kind(), "upstream");

        let err: CoreError = hmcgate_api::Error::Authentication {
            message: "nope".into(),
        }
        .into();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));

        let err: CoreError = hmcgate_api::Error::Protocol {
            message: "bad".into(),
            body: "<x/>".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Unexpected console response: bad");
    }
}
