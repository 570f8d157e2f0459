//! IUDX Auth: certificate-authenticated authorization for a multi-tenant
//! data platform.
//!
//! Clients present a client certificate; the server derives an identity and
//! a trust class from it, checks it against the revocation list, and uses
//! provider-set, capability-based grants to decide whether to mint an
//! access token, what it covers, and for how long. Tokens are introspected
//! by resource servers and can be revoked by consumers, by providers, or
//! wholesale by certificate.

pub mod capability;
pub mod config;
pub mod crypto;
pub mod error;
pub mod grant;
pub mod identity;
pub mod input;
pub mod policy;
pub mod response;
pub mod service;
pub mod storage;
pub mod time;
pub mod token;
pub mod trust;

// Re-export primary types
pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use response::Response;
pub use service::{AuthService, CertificateInfo, ServiceRequest};
pub use storage::Store;

pub use capability::{CapabilitySet, CapabilityTable};
pub use grant::{GrantListing, ItemType, Owner};
pub use identity::{ProviderId, ResourceId, Role, RoleStatus};
pub use policy::{GeoInfo, PolicyContext};
pub use token::{AuditReport, Introspection, IssuedToken, RequestItem, TokenRecord};
pub use trust::{Certificate, Endpoint, RevocationEntry, TrustDecision, TrustError};
