//! Token rows.
//!
//! Flag flips are guarded by the flag's previous value so repeated or
//! concurrent calls change each row at most once; callers report the number
//! of rows actually changed.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{AuthError, Result};
use crate::token::types::TokenRecord;

const TOKEN_COLUMNS: &str = "id, token, expiry, request, cert_serial, cert_fingerprint,
     issued_at, resource_ids, introspected, revoked, cert_class, server_token,
     providers, geoip, api_called_from";

/// SQLite JSON path selecting one provider key.
const PROVIDER_PATH: &str = "'$.\"' || ?P || '\"'";

fn provider_path(param: &str) -> String {
    PROVIDER_PATH.replace("?P", param)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<TokenRecord> {
    Ok(TokenRecord {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        expiry: row.get(2)?,
        request: json_column(row, 3)?,
        cert_serial: row.get(4)?,
        cert_fingerprint: row.get(5)?,
        issued_at: row.get(6)?,
        resource_ids: json_column(row, 7)?,
        introspected: row.get(8)?,
        revoked: row.get(9)?,
        cert_class: row.get(10)?,
        server_token: json_column(row, 11)?,
        providers: json_column(row, 12)?,
        geoip: json_column(row, 13)?,
        api_called_from: row.get(14)?,
    })
}

pub fn insert_token(conn: &Connection, token: &TokenRecord) -> Result<()> {
    let n = conn.execute(
        &format!(
            "INSERT INTO token ({TOKEN_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            token.id,
            token.token_hash,
            token.expiry,
            serde_json::to_string(&token.request)?,
            token.cert_serial,
            token.cert_fingerprint,
            token.issued_at,
            serde_json::to_string(&token.resource_ids)?,
            token.introspected,
            token.revoked,
            token.cert_class,
            serde_json::to_string(&token.server_token)?,
            serde_json::to_string(&token.providers)?,
            serde_json::to_string(&token.geoip)?,
            token.api_called_from,
        ],
    )?;

    if n == 0 {
        return Err(AuthError::StorageError("token row not inserted".into()));
    }
    Ok(())
}

/// Tokens issued to `id` at or after `since`.
pub fn count_issued_since(conn: &Connection, id: &str, since: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM token WHERE id = ?1 AND issued_at >= ?2",
        params![id, since],
        |r| r.get(0),
    )?)
}

/// A non-revoked, unexpired token of `id` by hash.
pub fn find_live(conn: &Connection, id: &str, hash: &str, now: i64) -> Result<Option<TokenRecord>> {
    let sql = format!(
        "SELECT {TOKEN_COLUMNS} FROM token
         WHERE id = ?1 AND token = ?2 AND revoked = 0 AND expiry > ?3 LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![id, hash, now], token_from_row)
        .optional()?)
}

pub fn find_by_hash(conn: &Connection, hash: &str) -> Result<Option<TokenRecord>> {
    let sql = format!("SELECT {TOKEN_COLUMNS} FROM token WHERE token = ?1");
    Ok(conn.query_row(&sql, [hash], token_from_row).optional()?)
}

pub fn mark_introspected(conn: &Connection, hash: &str, now: i64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE token SET introspected = 1
         WHERE token = ?1 AND introspected = 0 AND revoked = 0 AND expiry > ?2",
        params![hash, now],
    )?)
}

/// Does `id` own an unexpired token with this hash (revoked or not)?
pub fn exists_unexpired(conn: &Connection, id: &str, hash: &str, now: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM token WHERE id = ?1 AND token = ?2 AND expiry > ?3 LIMIT 1",
            params![id, hash, now],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn revoke(conn: &Connection, id: &str, hash: &str, now: i64) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE token SET revoked = 1
         WHERE id = ?1 AND token = ?2 AND revoked = 0 AND expiry > ?3",
        params![id, hash, now],
    )?)
}

/// Does an unexpired token with this hash carry an entry for `provider`?
pub fn has_provider_entry(conn: &Connection, hash: &str, provider: &str, now: i64) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM token
         WHERE token = ?1 AND expiry > ?3 AND json_type(providers, {}) IS NOT NULL LIMIT 1",
        provider_path("?2")
    );
    let found: Option<i64> = conn
        .query_row(&sql, params![hash, provider, now], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Flip `providers[provider]` from true to false on one unexpired token.
pub fn revoke_provider_entry(conn: &Connection, hash: &str, provider: &str, now: i64) -> Result<usize> {
    let path = provider_path("?2");
    let sql = format!(
        "UPDATE token SET providers = json_set(providers, {path}, json('false'))
         WHERE token = ?1 AND expiry > ?3 AND json_type(providers, {path}) = 'true'"
    );
    Ok(conn.execute(&sql, params![hash, provider, now])?)
}

/// Revoke every live token of `id` bound to one certificate.
pub fn revoke_all_own(
    conn: &Connection,
    id: &str,
    serial: &str,
    fingerprint: &str,
    now: i64,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE token SET revoked = 1
         WHERE id = ?1 AND cert_serial = ?2 AND cert_fingerprint = ?3
           AND expiry > ?4 AND revoked = 0",
        params![id, serial, fingerprint, now],
    )?)
}

/// Flip `providers[provider]` to false on every live token bound to one
/// certificate.
pub fn revoke_all_provider(
    conn: &Connection,
    provider: &str,
    serial: &str,
    fingerprint: &str,
    now: i64,
) -> Result<usize> {
    let path = provider_path("?1");
    let sql = format!(
        "UPDATE token SET providers = json_set(providers, {path}, json('false'))
         WHERE cert_serial = ?2 AND cert_fingerprint = ?3 AND expiry > ?4
           AND revoked = 0 AND json_type(providers, {path}) = 'true'"
    );
    Ok(conn.execute(&sql, params![provider, serial, fingerprint, now])?)
}

/// Tokens issued to `id` since `since`, newest first.
pub fn issued_to(conn: &Connection, id: &str, since: i64) -> Result<Vec<TokenRecord>> {
    let sql = format!(
        "SELECT {TOKEN_COLUMNS} FROM token
         WHERE id = ?1 AND issued_at >= ?2 ORDER BY issued_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![id, since], token_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Tokens naming `provider` since `since`, newest first.
pub fn naming_provider(conn: &Connection, provider: &str, since: i64) -> Result<Vec<TokenRecord>> {
    let sql = format!(
        "SELECT {TOKEN_COLUMNS} FROM token
         WHERE json_type(providers, {}) IS NOT NULL AND issued_at >= ?2
         ORDER BY issued_at DESC, rowid DESC",
        provider_path("?1")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![provider, since], token_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
