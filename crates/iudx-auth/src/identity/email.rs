//! Email grammar used for identities and certificate fields.
//!
//! The login part is capped at 30 characters: with roughly 40 allowed
//! characters, 40^30 stays below the 2^160 space of the SHA-1 provider hash,
//! which bounds a brute-force search for the email behind a provider id.

/// Shortest accepted email, e.g. `a@b.c`.
const MIN_EMAIL_LEN: usize = 5;
const MAX_EMAIL_LEN: usize = 64;
const MAX_LOGIN_LEN: usize = 30;

/// Check an email against the platform's restricted grammar.
///
/// Rules: 5..=64 characters, exactly one `@`, at least one `.`, a login of
/// 1..=30 characters, no leading `.`, `-`, `_` or `@`, and only
/// `[A-Za-z0-9._@-]` characters.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < MIN_EMAIL_LEN || email.len() > MAX_EMAIL_LEN {
        return false;
    }

    match email.chars().next() {
        Some('.' | '-' | '_' | '@') | None => return false,
        _ => {}
    }

    let mut parts = email.split('@');
    let login = parts.next().unwrap_or_default();
    if parts.next().is_none() || parts.next().is_some() {
        return false;
    }

    if login.is_empty() || login.len() > MAX_LOGIN_LEN {
        return false;
    }

    let mut num_dots = 0;
    for ch in email.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '@' => {}
            '.' => num_dots += 1,
            _ => return false,
        }
    }

    num_dots >= 1
}

/// Domain part of an email, lowercased. Returns `None` without an `@`.
pub fn email_domain(email: &str) -> Option<String> {
    email
        .split_once('@')
        .map(|(_, domain)| domain.to_ascii_lowercase())
}
