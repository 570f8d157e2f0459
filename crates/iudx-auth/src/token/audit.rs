//! Token audit: what was issued to the caller, and what was issued against
//! the caller's resources.

use serde::Serialize;
use serde_json::Value;

use crate::error::{AuthError, Result};
use crate::identity::{ProviderId, ResourceId};
use crate::input::{is_present, parse_int};
use crate::policy::GeoInfo;
use crate::storage::{tokens, Store};
use crate::time::secs_to_rfc3339;

use super::types::{RequestItem, TokenRecord};

/// Longest audit window: five years.
pub const MAX_AUDIT_HOURS: i64 = 43_800;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Set on provider entries only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(rename = "token-hash", skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
    #[serde(rename = "token-issued-at")]
    pub token_issued_at: String,
    pub introspected: bool,
    pub revoked: bool,
    pub expiry: String,
    pub expired: bool,
    #[serde(rename = "certificate-serial-number")]
    pub certificate_serial_number: String,
    #[serde(rename = "certificate-fingerprint")]
    pub certificate_fingerprint: String,
    pub request: Vec<RequestItem>,
    pub geoip: GeoInfo,
    #[serde(rename = "api-called-from")]
    pub api_called_from: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    #[serde(rename = "as-consumer")]
    pub as_consumer: Vec<AuditEntry>,
    #[serde(rename = "as-provider")]
    pub as_provider: Vec<AuditEntry>,
}

fn entry(record: TokenRecord, now: i64) -> AuditEntry {
    AuditEntry {
        consumer: None,
        token_hash: None,
        token_issued_at: secs_to_rfc3339(record.issued_at),
        introspected: record.introspected,
        revoked: record.revoked,
        expiry: secs_to_rfc3339(record.expiry),
        expired: record.is_expired(now),
        certificate_serial_number: record.cert_serial,
        certificate_fingerprint: record.cert_fingerprint,
        request: record.request,
        geoip: record.geoip,
        api_called_from: record.api_called_from,
    }
}

/// Audit the last `hours` (from `body`) of tokens for `identity`.
pub fn audit(store: &Store, identity: &str, body: &Value, now: i64) -> Result<AuditReport> {
    let hours = body
        .get("hours")
        .filter(|v| is_present(Some(v)))
        .ok_or_else(|| AuthError::invalid("No 'hours' found in the body"))?;
    let hours = parse_int(hours)
        .filter(|h| (1..=MAX_AUDIT_HOURS).contains(h))
        .ok_or_else(|| AuthError::invalid("'hours' must be a positive number"))?;

    let since = now - hours * 3600;
    let provider = ProviderId::from_email(identity);

    let (issued, naming) = store.with_conn(|conn| {
        let issued = tokens::issued_to(conn, identity, since)?;
        let naming = match &provider {
            Some(p) => tokens::naming_provider(conn, p.as_str(), since)?,
            None => Vec::new(),
        };
        Ok((issued, naming))
    })?;

    let as_consumer = issued.into_iter().map(|r| entry(r, now)).collect();

    let as_provider = match &provider {
        Some(p) => naming
            .into_iter()
            .map(|r| provider_entry(r, p, now))
            .collect(),
        None => Vec::new(),
    };

    Ok(AuditReport {
        as_consumer,
        as_provider,
    })
}

/// A token seen by one of the providers it names: only that provider's
/// resources, and revoked once the provider withdrew them.
fn provider_entry(mut record: TokenRecord, provider: &ProviderId, now: i64) -> AuditEntry {
    let honoured = record.providers.get(provider.as_str()) == Some(&true);
    record.revoked = record.revoked || !honoured;
    record.request.retain(|r| {
        ResourceId::parse(&r.id).is_some_and(|res| res.provider() == provider)
    });

    let consumer = record.id.clone();
    let token_hash = record.token_hash.clone();

    AuditEntry {
        consumer: Some(consumer),
        token_hash: Some(token_hash),
        ..entry(record, now)
    }
}
