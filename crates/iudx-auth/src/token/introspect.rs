//! Token introspection by resource servers.
//!
//! A resource server presents a token (and its sub-token when the token
//! spans several servers) and learns which of its own resources the token
//! covers. Entries for other servers, or for providers that revoked the
//! token, are never revealed.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::AuthConfig;
use crate::crypto::sha256_hex;
use crate::error::{AuthError, Result};
use crate::identity::ResourceId;
use crate::input::is_present;
use crate::storage::{tokens, Store};
use crate::time::secs_to_rfc3339;
use crate::trust::TrustDecision;

use super::format::{grantee, is_valid_server_token, is_valid_token};
use super::types::{RequestItem, ServerToken, TokenRecord};

/// What a resource server learns about a token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Introspection {
    pub consumer: String,
    /// RFC 3339 expiry time.
    pub expiry: String,
    pub request: Vec<RequestItem>,
    #[serde(rename = "consumer-certificate-class")]
    pub consumer_certificate_class: u8,
}

/// The sub-token presented alongside a token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Presented {
    Bare,
    Token(String),
}

fn invalid_token() -> AuthError {
    AuthError::unauthorized("Invalid 'token'", None)
}

fn invalid_server_token() -> AuthError {
    AuthError::unauthorized("Invalid 'server-token'", None)
}

/// Introspect the token in `body` for the resource server identified by
/// the certificate CN in `decision`.
pub fn introspect(
    store: &Store,
    config: &AuthConfig,
    decision: &TrustDecision,
    body: &Value,
    now: i64,
) -> Result<Introspection> {
    let server = decision.common_name.to_ascii_lowercase();

    let token = body
        .get("token")
        .filter(|v| is_present(Some(v)))
        .ok_or_else(|| AuthError::invalid("No 'token' found in the body"))?;
    let token = token
        .as_str()
        .filter(|t| is_valid_token(t, &config.server_name, None))
        .ok_or_else(|| AuthError::invalid("Invalid 'token'"))?
        .to_ascii_lowercase();

    let presented = match body.get("server-token") {
        None | Some(Value::Null) | Some(Value::Bool(true)) => Presented::Bare,
        Some(Value::String(s)) if s.is_empty() || s == "true" => Presented::Bare,
        Some(Value::String(s)) => {
            let s = s.to_ascii_lowercase();
            if !is_valid_server_token(&s, &server) {
                return Err(AuthError::invalid("Invalid 'server-token'"));
            }
            Presented::Token(s)
        }
        Some(_) => return Err(AuthError::invalid("Invalid 'server-token'")),
    };

    let consumer_request = match body.get("request") {
        Some(v) if is_present(Some(v)) => Some(
            v.as_array()
                .ok_or_else(|| AuthError::invalid("'request' must be an valid JSON array"))?,
        ),
        _ => None,
    };

    let issued_to = grantee(&token).unwrap_or_default().to_string();
    let hash = sha256_hex(&token);

    let record = store
        .with_conn(|conn| tokens::find_live(conn, &issued_to, &hash, now))?
        .ok_or_else(invalid_token)?;

    check_server_token(&record, &server, &presented)?;

    let request = visible_request(&record, &server);
    if request.is_empty() {
        return Err(invalid_token());
    }

    if let Some(consumer_request) = consumer_request {
        check_consumer_request(consumer_request, &request)?;
    }

    store.with_conn(|conn| tokens::mark_introspected(conn, &hash, now))?;

    log::info!(
        "INTROSPECTED_TOKEN: {}",
        json!({
            "resource_server": server,
            "token_hash": hash,
            "issued_to": issued_to,
        })
    );

    Ok(Introspection {
        consumer: issued_to,
        expiry: secs_to_rfc3339(record.expiry),
        request,
        consumer_certificate_class: record.cert_class,
    })
}

fn check_server_token(record: &TokenRecord, server: &str, presented: &Presented) -> Result<()> {
    let expected = record.server_token.get(server).ok_or_else(invalid_token)?;

    match (expected, presented) {
        (ServerToken::Bare(false), _) => Err(invalid_token()),
        (ServerToken::Bare(true), Presented::Bare) if record.server_token.len() == 1 => Ok(()),
        (ServerToken::Hash(expected), Presented::Token(st)) if sha256_hex(st) == *expected => Ok(()),
        _ => Err(invalid_server_token()),
    }
}

/// Entries of `record` on `server` whose provider still honours the token.
fn visible_request(record: &TokenRecord, server: &str) -> Vec<RequestItem> {
    record
        .request
        .iter()
        .filter(|r| {
            ResourceId::parse(&r.id).is_some_and(|res| {
                res.server() == server
                    && record.providers.get(res.provider().as_str()) == Some(&true)
            })
        })
        .cloned()
        .collect()
}

/// Every entry the resource server asks about must match a visible entry
/// exactly; methods and apis compare as sets.
fn check_consumer_request(asked: &[Value], visible: &[RequestItem]) -> Result<()> {
    if asked.len() > visible.len() {
        return Err(AuthError::unauthorized("Unauthorized !", None));
    }

    for item in asked {
        let obj = item.as_object().ok_or_else(|| {
            AuthError::invalid_with("'request' must be a valid JSON object", item.clone())
        })?;

        let id = obj.get("id").cloned().unwrap_or_default();
        let mismatch = || AuthError::unauthorized("Unauthorized", Some(id.clone()));

        let stored = visible
            .iter()
            .find(|r| id.as_str() == Some(r.id.as_str()))
            .ok_or_else(mismatch)?;

        let methods = string_set(obj.get("methods"), "*").ok_or_else(mismatch)?;
        let apis = string_set(obj.get("apis"), "/*").ok_or_else(mismatch)?;
        let body = obj.get("body").filter(|b| is_present(Some(b)));

        let stored_methods: BTreeSet<&str> = stored.methods.iter().map(String::as_str).collect();
        let stored_apis: BTreeSet<&str> = stored.apis.iter().map(String::as_str).collect();

        let same = methods == stored_methods && apis == stored_apis && body == stored.body.as_ref();

        if !same {
            return Err(mismatch());
        }
    }

    Ok(())
}

/// A list of strings as a set; absent means `[default]`, anything but an
/// array of strings is `None`.
fn string_set<'v>(value: Option<&'v Value>, default: &'v str) -> Option<BTreeSet<&'v str>> {
    match value {
        Some(v) if is_present(Some(v)) => v
            .as_array()?
            .iter()
            .map(Value::as_str)
            .collect::<Option<BTreeSet<_>>>(),
        _ => Some(BTreeSet::from([default])),
    }
}
