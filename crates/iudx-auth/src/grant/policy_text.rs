//! Policy text for grants.

use serde_json::Value;

use crate::error::{AuthError, Result};
use crate::policy;

/// Validity every synthesized grant rule carries.
const GRANT_VALIDITY: &str = "1 week";

/// Rule for a resource-group grant: the grantee may call `apis` on anything
/// under `resource_name` (`server/group`).
///
/// `None` for an empty API list; a resource rule is never unconditional.
pub fn resource_rule(grantee: &str, resource_name: &str, apis: &[String]) -> Option<String> {
    if apis.is_empty() {
        return None;
    }

    let mut rule = format!("{grantee} can access {resource_name}/* for {GRANT_VALIDITY}");
    let mut join = "if";
    for api in apis {
        rule.push_str(&format!(" {join} api = \"{api}\""));
        join = "or";
    }
    Some(rule)
}

/// Rule for an onboarder grant on the catalogue.
pub fn catalogue_rule(grantee: &str, catalogue_resource: &str) -> String {
    format!("{grantee} can access {catalogue_resource} for {GRANT_VALIDITY}")
}

/// Compile policy text into the JSON stored with the grant.
pub fn compile(text: &str) -> Result<Value> {
    let rule = policy::parse(text).map_err(|e| AuthError::Policy(format!("{e}: {text}")))?;
    Ok(serde_json::to_value(rule)?)
}
