use thiserror::Error;

/// Top-level error type for the `hmcgate-api` crate.
///
/// The four classes the retry policy reasons about are authentication,
/// protocol, upstream status and transport. `hmcgate-core` maps these into
/// user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Logon rejected, or the session is invalid and could not be renewed.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The response body did not have the expected shape.
    #[error("Protocol error: {message}")]
    Protocol { message: String, body: String },

    // ── Upstream ────────────────────────────────────────────────────
    /// Non-success status other than a recoverable auth failure, or a
    /// retried request that still failed.
    #[error("Upstream returned HTTP {status} for {url}")]
    Upstream { status: u16, url: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Build a protocol error keeping a bounded preview of the offending body.
    pub(crate) fn protocol(message: impl Into<String>, body: &str) -> Self {
        let preview: String = body.chars().take(200).collect();
        Self::Protocol {
            message: message.into(),
            body: preview,
        }
    }

    /// The upstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
