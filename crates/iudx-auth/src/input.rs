//! Input charset checks and sanitized echoes of user-supplied values.

use serde_json::Value;

/// Longest string accepted from a caller.
pub const MAX_SAFE_STRING_LEN: usize = 512;

/// Check that `s` is non-empty, at most [`MAX_SAFE_STRING_LEN`] long, and
/// only uses alphanumerics, `-/.@`, and the characters in `exceptions`.
pub fn is_string_safe(s: &str, exceptions: &str) -> bool {
    if s.is_empty() || s.len() > MAX_SAFE_STRING_LEN {
        return false;
    }

    s.chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "-/.@".contains(ch) || exceptions.contains(ch))
}

/// Is `s` a lowercase or uppercase hex string of exactly `len` characters?
pub fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Replace every character outside `-a-zA-Z0-9:/.@_` with `*`.
///
/// Strings are rewritten recursively inside arrays and objects; numbers,
/// booleans and null pass through unchanged.
pub fn xss_safe(input: &Value) -> Value {
    match input {
        Value::String(s) => Value::String(xss_safe_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(xss_safe).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (xss_safe_str(k), xss_safe(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// [`xss_safe`] for a plain string.
pub fn xss_safe_str(s: &str) -> String {
    s.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || "-:/.@_".contains(ch) {
                ch
            } else {
                '*'
            }
        })
        .collect()
}

/// Does a body field carry a value? `null`, `false`, `0` and `""` count as
/// absent.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Read an integer from a number or a decimal string. Fractions are
/// truncated.
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
                .map_or(s.len(), |(i, _)| i);
            s[..end].parse().ok()
        }
        _ => None,
    }
}
