//! The browser authentication snapshot persisted per platform.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cookie as captured from an authenticated browser context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// localStorage entries captured for one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

/// A saved session: the cookie jar plus per-origin storage, in the shape
/// browser-automation storage-state dumps use. Fields we do not model are
/// kept opaquely so richer snapshots survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionRecord {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SessionRecord {
    /// Canonical byte form used for both plaintext and encrypted storage.
    pub fn to_canonical_json(&self) -> atelier_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> atelier_core::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
