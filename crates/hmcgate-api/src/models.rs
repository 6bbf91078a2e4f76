// Console wire models
//
// The topology comes from the ManagementConsole XML document (decoded in
// `xml.rs`); per-device quick status is a loosely-typed JSON object whose
// fields may be missing or carry unexpected types on older firmware.

use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::Error;

// ── Topology ────────────────────────────────────────────────────────

/// Identity of the management console itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleIdentity {
    pub uuid: String,
    pub name: String,
    pub machine_type: String,
    pub model: String,
    pub serial: String,
}

impl ConsoleIdentity {
    /// Console machine type, model and serial as `TYPE-MODEL*SERIAL`.
    pub fn mtms(&self) -> String {
        format!("{}-{}*{}", self.machine_type, self.model, self.serial)
    }
}

/// Reference to one managed system, as listed by the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    /// The reference URL exactly as the console returned it.
    pub href: String,
    /// Final path segment of `href`.
    pub id: String,
}

impl DeviceRef {
    pub fn from_href(href: impl Into<String>) -> Self {
        let href = href.into();
        let id = last_path_segment(&href);
        Self { href, id }
    }
}

fn last_path_segment(href: &str) -> String {
    if let Ok(url) = Url::parse(href) {
        if let Some(segment) = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        {
            return segment.to_owned();
        }
    }
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_owned()
}

/// The set of managed systems known to the console at one point in time.
///
/// Replaced wholesale on refresh, never mutated in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub console: ConsoleIdentity,
    pub devices: Vec<DeviceRef>,
}

// ── Quick status ────────────────────────────────────────────────────

/// Per-system quick status document.
///
/// Every field is optional: a missing key and a value of the wrong JSON type
/// both decode to `None`, so a single odd field never fails the whole system.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuickStatus {
    #[serde(rename = "MTMS", default, deserialize_with = "lenient_string")]
    pub mtms: Option<String>,

    #[serde(rename = "SystemName", default, deserialize_with = "lenient_string")]
    pub system_name: Option<String>,

    #[serde(rename = "State", default, deserialize_with = "lenient_string")]
    pub state: Option<String>,

    #[serde(rename = "SystemLocation", default, deserialize_with = "lenient_string")]
    pub location: Option<String>,

    #[serde(
        rename = "PhysicalSystemAttentionLEDState",
        default,
        deserialize_with = "lenient_string"
    )]
    pub attention_led: Option<String>,

    #[serde(rename = "ReferenceCode", default, deserialize_with = "lenient_string")]
    pub reference_code: Option<String>,

    #[serde(
        rename = "MergedReferenceCode",
        default,
        deserialize_with = "lenient_string"
    )]
    pub merged_reference_code: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

impl QuickStatus {
    /// Decode a quick status body. The body must be a JSON object.
    pub fn from_json(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|e| {
            Error::protocol(
                format!("invalid quick status document: {e}"),
                &String::from_utf8_lossy(body),
            )
        })
    }

    /// Machine type, model and serial as `TYPE-MODEL-SERIAL`.
    ///
    /// The console reports `TYPE-MODEL*SERIAL`; the first `*` is replaced.
    pub fn mtms(&self) -> String {
        let raw = self.mtms.as_deref().unwrap_or_default();
        match raw.split_once('*') {
            Some((mtm, serial)) => format!("{mtm}-{serial}"),
            None => raw.to_owned(),
        }
    }

    pub fn system_name(&self) -> &str {
        self.system_name.as_deref().unwrap_or_default()
    }

    pub fn state(&self) -> &str {
        self.state.as_deref().unwrap_or_default()
    }

    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or_default()
    }

    pub fn reference_code(&self) -> &str {
        self.reference_code.as_deref().unwrap_or_default()
    }

    pub fn merged_reference_code(&self) -> &str {
        self.merged_reference_code.as_deref().unwrap_or_default()
    }

    /// Attention LED collapsed to a boolean.
    ///
    /// Absent, empty, `"null"` and `"false"` are off; any other string is on.
    pub fn attention_led(&self) -> bool {
        match self.attention_led.as_deref() {
            None | Some("" | "null" | "false") => false,
            Some(_) => true,
        }
    }
}
