use secrecy::SecretString;

/// Logon credentials for the management console.
///
/// Immutable for the life of the process. The host and TLS settings live
/// with the transport; this type carries only the secret material.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Header carrying the session token on every authenticated call.
pub const SESSION_HEADER: &str = "X-API-Session";

/// Content type the console expects on the logon PUT.
pub(crate) const LOGON_REQUEST_CONTENT_TYPE: &str =
    "application/vnd.ibm.powervm.web+xml; type=LogonRequest";

/// Accept header for the logon response document.
pub(crate) const LOGON_RESPONSE_ACCEPT: &str =
    "application/vnd.ibm.powervm.web+xml; type=LogonResponse";
