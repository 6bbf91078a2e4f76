//! Async client for HMC-style management console REST APIs.
//!
//! - [`HmcClient`] issues raw requests with the session header attached.
//! - [`Session`] owns the token: [`acquire`](Session::acquire),
//!   [`release`](Session::release) and
//!   [`replace_if_stale`](Session::replace_if_stale), all serialized.
//! - [`Session::fetch`] adds the one-shot re-authentication retry.
//! - [`xml`] and [`models`] decode the console's wire formats.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod session;
pub mod transport;
pub mod xml;

pub use auth::{Credentials, SESSION_HEADER};
pub use client::{HmcClient, RawResponse, RequestSpec};
pub use error::Error;
pub use models::{ConsoleIdentity, DeviceRef, QuickStatus, Topology};
pub use retry::Fetched;
pub use session::{Session, SessionState};
pub use transport::{TlsMode, TransportConfig};
