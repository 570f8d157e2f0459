//! Provider identity hashes and resource identifiers.

use serde::{Deserialize, Serialize};

use crate::crypto::sha1_hex;

use super::email::email_domain;

/// Public identity of a provider: `domain/SHA1(email)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Derive the provider id for an email. The email is lowercased first.
    pub fn from_email(email: &str) -> Option<Self> {
        let email = email.to_ascii_lowercase();
        let domain = email_domain(&email)?;
        Some(Self(format!("{domain}/{}", sha1_hex(&email))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decomposed resource identifier.
///
/// `provider-domain/provider-email-sha1/resource-server/name...`; the first
/// three segments are case-normalized, the name keeps its case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    raw: String,
    provider: ProviderId,
    server: String,
    name: String,
    group: String,
}

impl ResourceId {
    /// Split an identifier with at least three `/` separators.
    pub fn parse(id: &str) -> Option<Self> {
        if id.matches('/').count() < 3 {
            return None;
        }

        let split: Vec<&str> = id.split('/').collect();
        let provider = ProviderId(format!(
            "{}/{}",
            split[0].to_ascii_lowercase(),
            split[1].to_ascii_lowercase()
        ));
        let server = split[2].to_ascii_lowercase();
        let name = split[3..].join("/");
        let group = format!("{}/{}/{}", provider.0, server, split[3]);

        Some(Self {
            raw: id.to_string(),
            provider,
            server,
            name,
            group,
        })
    }

    /// The identifier exactly as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Resource server hostname, lowercased.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Everything after the resource server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resource group this resource belongs to.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Name used by policies: `server/name`.
    pub fn policy_resource(&self) -> String {
        format!("{}/{}", self.server, self.name)
    }
}
