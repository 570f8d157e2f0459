//! Token records and their parts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::GeoInfo;

/// One authorized resource inside a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestItem {
    pub id: String,
    pub methods: Vec<String>,
    pub apis: Vec<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Per-resource-server slot of a token.
///
/// `Bare` when the token names a single server; otherwise the SHA-256 of
/// that server's sub-token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerToken {
    Bare(bool),
    Hash(String),
}

/// A persisted token. Only the SHA-256 of the bearer value is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    /// Identity the token was issued to.
    pub id: String,
    pub token_hash: String,
    pub expiry: i64,
    pub request: Vec<RequestItem>,
    pub cert_serial: String,
    pub cert_fingerprint: String,
    pub cert_class: u8,
    pub issued_at: i64,
    pub server_token: BTreeMap<String, ServerToken>,
    /// Provider id → still honoured. Flipped to `false` by the provider.
    pub providers: BTreeMap<String, bool>,
    pub introspected: bool,
    pub revoked: bool,
    pub resource_ids: BTreeMap<String, bool>,
    pub geoip: GeoInfo,
    pub api_called_from: Option<String>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }
}

/// Response to a successful token request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    #[serde(rename = "token-type")]
    pub token_type: &'static str,
    #[serde(rename = "expires-in")]
    pub expires_in: i64,
    /// Server → `true` or plaintext sub-token.
    #[serde(rename = "server-token")]
    pub server_token: BTreeMap<String, Value>,
}
