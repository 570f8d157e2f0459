//! Token and sub-token formats.
//!
//! A token is `issuer/grantee/random` and a sub-token is `server/random`,
//! where `random` is [`TOKEN_LEN_HEX`] hex characters.

use crate::crypto::{random_token_hex, TOKEN_LEN_HEX};
use crate::identity::is_valid_email;
use crate::input::is_string_safe;

pub fn new_token(issuer: &str, grantee: &str) -> String {
    format!("{issuer}/{grantee}/{}", random_token_hex())
}

pub fn new_server_token(server: &str) -> String {
    format!("{server}/{}", random_token_hex())
}

/// Check a token's shape. With `grantee`, the token must also have been
/// issued to that identity.
pub fn is_valid_token(token: &str, issuer: &str, grantee: Option<&str>) -> bool {
    if !is_string_safe(token, "") {
        return false;
    }

    let split: Vec<&str> = token.split('/').collect();
    let [issued_by, issued_to, random] = split.as_slice() else {
        return false;
    };

    if *issued_by != issuer || random.len() != TOKEN_LEN_HEX {
        return false;
    }

    if grantee.is_some_and(|g| g != *issued_to) {
        return false;
    }

    is_valid_email(issued_to)
}

/// Identity a well-formed token was issued to.
pub fn grantee(token: &str) -> Option<&str> {
    token.split('/').nth(1)
}

/// Check a sub-token presented by the resource server `server`.
pub fn is_valid_server_token(server_token: &str, server: &str) -> bool {
    if !is_string_safe(server_token, "") {
        return false;
    }

    match server_token.split_once('/') {
        Some((issued_to, random)) => {
            issued_to == server && !random.contains('/') && random.len() == TOKEN_LEN_HEX
        }
        None => false,
    }
}

/// Is `hash` a lowercase SHA-256 hex digest?
pub fn is_valid_token_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
