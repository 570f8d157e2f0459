//! Response envelopes.
//!
//! Every response carries a strict content-security header and a JSON
//! body. Error bodies echo offending input only after [`xss_safe`] and then
//! add a disclaimer field noting the substitution.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::AuthError;
use crate::input::xss_safe;

/// Headers attached to every response.
pub const RESPONSE_HEADERS: [(&str, &str); 2] = [
    ("Content-Security-Policy", "default-src 'none'"),
    ("Content-Type", "application/json"),
];

const INVALID_INPUT_DISCLAIMER: &str =
    "Unsafe characters (if any) in 'invalid-input' field have been replaced with '*'";

/// Opaque message for internal failures.
pub const INTERNAL_ERROR: &str = "Internal error!";

/// A status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    /// A 200 response. `None` becomes `{"success": true}`.
    pub fn success(body: Option<Value>) -> Self {
        Self {
            status: 200,
            body: body.unwrap_or_else(|| json!({ "success": true })),
        }
    }

    /// Translate an error into its caller-visible response.
    ///
    /// Internal errors are logged here with their full detail and replaced
    /// by an opaque message.
    pub fn from_error(err: &AuthError) -> Self {
        if err.is_internal() {
            log::error!("END_ERROR: {err}");
            return Self {
                status: err.status(),
                body: json!({ "error": { "message": INTERNAL_ERROR } }),
            };
        }

        let mut error = Map::new();
        fill_error(err, &mut error);

        let mut body = Map::new();
        if error.contains_key("invalid-input") {
            body.insert("//".into(), Value::String(INVALID_INPUT_DISCLAIMER.into()));
        }
        body.insert("error".into(), Value::Object(error));

        Self {
            status: err.status(),
            body: Value::Object(body),
        }
    }

    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        &RESPONSE_HEADERS
    }
}

fn fill_error(err: &AuthError, out: &mut Map<String, Value>) {
    match err {
        AuthError::InvalidInput {
            message,
            invalid_input,
        }
        | AuthError::Unauthorized {
            message,
            invalid_input,
        } => {
            out.insert("message".into(), Value::String(message.clone()));
            if let Some(input) = invalid_input {
                out.insert("invalid-input".into(), xss_safe(input));
            }
        }
        AuthError::PartialRevocation {
            message,
            invalid_input,
            num_tokens_revoked,
        } => {
            out.insert("message".into(), Value::String(message.clone()));
            out.insert("invalid-input".into(), xss_safe(invalid_input));
            out.insert("num-tokens-revoked".into(), json!(num_tokens_revoked));
        }
        AuthError::BatchItem { index, source } => {
            fill_error(source, out);
            out.insert("id".into(), json!(index));
        }
        other => {
            out.insert("message".into(), Value::String(other.to_string()));
        }
    }
}

impl From<AuthError> for Response {
    fn from(err: AuthError) -> Self {
        Self::from_error(&err)
    }
}
