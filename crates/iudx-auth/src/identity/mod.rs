//! Identities: emails, roles, provider identity hashes, and resource
//! identifiers.
//!
//! A provider is addressed publicly by `domain/SHA1(email)` so that resource
//! identifiers never carry a raw email address. A resource identifier is
//! `provider-domain/SHA1(provider-email)/resource-server/resource-name...`.

pub mod email;
pub mod resource;
pub mod role;

pub use email::{email_domain, is_valid_email};
pub use resource::{ProviderId, ResourceId};
pub use role::{Role, RoleStatus};
