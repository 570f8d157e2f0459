//! Token revocation.
//!
//! Consumers revoke their own tokens; providers withdraw their resources
//! from a token by hash. Every flip is guarded by the flag's previous value
//! so the reported count is the number of rows actually changed.

use serde_json::{json, Value};

use crate::crypto::sha256_hex;
use crate::error::{AuthError, Result};
use crate::identity::ProviderId;
use crate::input::is_present;
use crate::storage::{tokens, Store};

use super::format::{is_valid_token, is_valid_token_hash};

fn partial(message: &str, input: &Value, revoked: usize) -> AuthError {
    AuthError::PartialRevocation {
        message: message.into(),
        invalid_input: input.clone(),
        num_tokens_revoked: revoked,
    }
}

fn provider_of(identity: &str) -> Result<ProviderId> {
    ProviderId::from_email(identity).ok_or_else(|| {
        AuthError::Certificate("Invalid 'emailAddress' field in the certificate".into())
    })
}

/// Revoke the `tokens` or `token-hashes` listed in `body` for `identity`.
/// Returns the number of tokens revoked.
pub fn revoke(
    store: &Store,
    server_name: &str,
    identity: &str,
    body: &Value,
    now: i64,
) -> Result<usize> {
    let tokens_field = body.get("tokens").filter(|v| is_present(Some(v)));
    let hashes_field = body.get("token-hashes").filter(|v| is_present(Some(v)));

    let (revoked, role) = match (tokens_field, hashes_field) {
        (Some(_), Some(_)) => {
            return Err(AuthError::invalid(
                "Provide either 'tokens' or 'token-hashes'; but not both",
            ))
        }
        (None, None) => return Err(AuthError::invalid("No 'tokens' or 'token-hashes' found")),
        (Some(list), None) => {
            let list = list
                .as_array()
                .ok_or_else(|| AuthError::invalid("'tokens' must be a valid JSON array"))?;
            (revoke_tokens(store, server_name, identity, list, now)?, "consumer")
        }
        (None, Some(list)) => {
            let list = list
                .as_array()
                .ok_or_else(|| AuthError::invalid("'token-hashes' must be a valid JSON array"))?;
            (revoke_hashes(store, identity, list, now)?, "provider")
        }
    };

    log::info!(
        "REVOKED_TOKENS: {}",
        json!({ "requester": identity, "requesterRole": role, "revoked": revoked })
    );

    Ok(revoked)
}

fn revoke_tokens(
    store: &Store,
    server_name: &str,
    identity: &str,
    list: &[Value],
    now: i64,
) -> Result<usize> {
    let mut revoked = 0;

    for item in list {
        let token = item
            .as_str()
            .filter(|t| is_valid_token(t, server_name, Some(identity)))
            .ok_or_else(|| partial("Invalid 'token'", item, revoked))?;
        let hash = sha256_hex(&token.to_ascii_lowercase());

        let changed = store.with_conn(|conn| {
            if !tokens::exists_unexpired(conn, identity, &hash, now)? {
                return Err(partial("Invalid 'token'", item, revoked));
            }
            tokens::revoke(conn, identity, &hash, now)
        })?;
        revoked += changed;
    }

    Ok(revoked)
}

fn revoke_hashes(store: &Store, identity: &str, list: &[Value], now: i64) -> Result<usize> {
    let provider = provider_of(identity)?;
    let mut revoked = 0;

    for item in list {
        let hash = item
            .as_str()
            .filter(|h| is_valid_token_hash(h))
            .ok_or_else(|| partial("Invalid 'token-hash'", item, revoked))?;

        let changed = store.with_conn(|conn| {
            if !tokens::has_provider_entry(conn, hash, provider.as_str(), now)? {
                return Err(partial("Invalid 'token-hash'", item, revoked));
            }
            tokens::revoke_provider_entry(conn, hash, provider.as_str(), now)
        })?;
        revoked += changed;
    }

    Ok(revoked)
}

/// Is `serial` a 40-digit hex serial, optionally negative?
pub fn is_valid_serial(serial: &str) -> bool {
    let digits = serial.strip_prefix('-').unwrap_or(serial);
    digits.len() == 40 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Is `fingerprint` 20 colon-separated hex pairs?
pub fn is_valid_fingerprint(fingerprint: &str) -> bool {
    let pairs: Vec<&str> = fingerprint.split(':').collect();
    pairs.len() == 20
        && pairs
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Revoke every live token bound to one certificate: the caller's own
/// tokens outright, and the caller's provider entry on everyone else's.
pub fn revoke_all(store: &Store, identity: &str, body: &Value, now: i64) -> Result<usize> {
    let serial = required(body, "serial", is_valid_serial)?;
    let fingerprint = required(body, "fingerprint", is_valid_fingerprint)?;
    let provider = provider_of(identity)?;

    let (own, as_provider) = store.with_transaction(|conn| {
        let own = tokens::revoke_all_own(conn, identity, &serial, &fingerprint, now)?;
        let as_provider =
            tokens::revoke_all_provider(conn, provider.as_str(), &serial, &fingerprint, now)?;
        Ok((own, as_provider))
    })?;

    let revoked = own + as_provider;

    log::info!(
        "REVOKED_ALL_TOKENS: {}",
        json!({
            "requester": identity,
            "requesterRole": if as_provider == 0 { "consumer" } else { "provider" },
            "serial": serial,
            "fingerprint": fingerprint,
            "revoked": revoked,
        })
    );

    Ok(revoked)
}

/// A required string field, checked and lowercased.
fn required(body: &Value, name: &str, valid: fn(&str) -> bool) -> Result<String> {
    let value = body
        .get(name)
        .filter(|v| is_present(Some(v)))
        .ok_or_else(|| AuthError::invalid(format!("No '{name}' found in the body")))?;

    value
        .as_str()
        .filter(|s| valid(s))
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| AuthError::invalid(format!("Invalid '{name}'")))
}
