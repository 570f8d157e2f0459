//! Token lifecycle: authorization, issuance, introspection, revocation and
//! audit.
//!
//! The token module provides:
//! - Batch authorization of token requests against provider grants
//! - Minting of tokens and per-server sub-tokens
//! - Introspection by resource servers
//! - Revocation by consumers, providers, and certificate
//! - Audit of issued tokens

pub mod audit;
pub mod authorize;
pub mod format;
pub mod introspect;
pub mod issue;
pub mod revoke;
pub mod types;

pub use audit::{audit, AuditEntry, AuditReport, MAX_AUDIT_HOURS};
pub use authorize::{Authorization, Authorizer, NO_POLICY};
pub use format::{is_valid_server_token, is_valid_token, is_valid_token_hash};
pub use introspect::{introspect, Introspection};
pub use issue::{issue, Origin};
pub use revoke::{is_valid_fingerprint, is_valid_serial, revoke, revoke_all};
pub use types::{IssuedToken, RequestItem, ServerToken, TokenRecord};
