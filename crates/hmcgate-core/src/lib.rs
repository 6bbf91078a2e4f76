//! Console-facing logic between `hmcgate-api` and the HTTP front-end.
//!
//! - **[`Gateway`]** is the facade: [`connect()`](Gateway::connect) logs on,
//!   [`quick_status()`](Gateway::quick_status) builds a [`Report`],
//!   [`management_console_xml()`](Gateway::management_console_xml) relays the
//!   raw console document, [`shutdown()`](Gateway::shutdown) logs off.
//!
//! - **[`TopologyCache`]** keeps the managed system list and refreshes it on
//!   the first read after its interval expires.
//!
//! - **[`Aggregator`]** fetches per-system quick status, drops systems that
//!   fail, and keeps topology order.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod topology;

// ── Primary re-exports ──────────────────────────────────────────────
pub use aggregate::Aggregator;
pub use config::{DEFAULT_TOPOLOGY_REFRESH, GatewayConfig, TlsVerification};
pub use error::CoreError;
pub use gateway::{Gateway, with_deadline};
pub use model::{ConnectionState, DeviceStatus, GatewayStatus, Report};
pub use topology::TopologyCache;
