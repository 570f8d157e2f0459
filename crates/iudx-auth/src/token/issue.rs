//! Token minting and persistence.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::config::AuthConfig;
use crate::crypto::sha256_hex;
use crate::error::Result;
use crate::policy::GeoInfo;
use crate::storage::{tokens, Store};
use crate::time::secs_to_rfc3339;
use crate::trust::TrustDecision;

use super::authorize::Authorization;
use super::format::{new_server_token, new_token};
use super::types::{IssuedToken, ServerToken, TokenRecord};

/// Where a token request came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Origin {
    pub geo: GeoInfo,
    /// Value of the caller's `Origin` header.
    pub api_called_from: Option<String>,
}

/// Mint and store a token for an authorized batch. Returns the plaintext
/// token and sub-tokens; only their hashes are persisted.
pub fn issue(
    store: &Store,
    config: &AuthConfig,
    decision: &TrustDecision,
    auth: Authorization,
    origin: Origin,
    now: i64,
) -> Result<IssuedToken> {
    let token = new_token(&config.server_name, &decision.identity);

    let mut plain: BTreeMap<String, Value> = BTreeMap::new();
    let mut hashed: BTreeMap<String, ServerToken> = BTreeMap::new();

    if auth.servers.len() > 1 {
        for server in &auth.servers {
            let sub = new_server_token(server);
            hashed.insert(server.clone(), ServerToken::Hash(sha256_hex(&sub)));
            plain.insert(server.clone(), Value::String(sub));
        }
    } else {
        for server in &auth.servers {
            hashed.insert(server.clone(), ServerToken::Bare(true));
            plain.insert(server.clone(), Value::Bool(true));
        }
    }

    let record = TokenRecord {
        id: decision.identity.clone(),
        token_hash: sha256_hex(&token.to_ascii_lowercase()),
        expiry: now + auth.expiry,
        resource_ids: auth.request.iter().map(|r| (r.id.clone(), true)).collect(),
        request: auth.request,
        cert_serial: decision.certificate.serial_lowercase(),
        cert_fingerprint: decision.certificate.fingerprint_lowercase(),
        cert_class: decision.class,
        issued_at: now,
        server_token: hashed,
        providers: auth.providers.into_iter().map(|p| (p, true)).collect(),
        introspected: false,
        revoked: false,
        geoip: origin.geo,
        api_called_from: origin.api_called_from,
    };

    store.with_conn(|conn| tokens::insert_token(conn, &record))?;

    log::info!(
        "ISSUED_TOKEN: {}",
        json!({
            "requester": record.id,
            "requesterRole": record.cert_class,
            "token_expiry": secs_to_rfc3339(record.expiry),
            "resource_ids": record.request,
        })
    );

    Ok(IssuedToken {
        token,
        token_type: "IUDX",
        expires_in: auth.expiry,
        server_token: plain,
    })
}
