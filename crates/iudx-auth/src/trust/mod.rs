//! Certificate trust evaluation.
//!
//! The trust module provides:
//! - The parsed client certificate model with a bounded issuer chain
//! - Normalized revocation list entries
//! - The evaluator turning a certificate into a class and an identity

pub mod certificate;
pub mod evaluate;
pub mod revocation;

pub use certificate::{Certificate, ChainCertificate, DistinguishedName, IssuerChain, MAX_CHAIN_LEN};
pub use evaluate::{evaluate, Endpoint, TrustAnchors, TrustDecision, TrustError};
pub use revocation::{is_revoked, normalize_fingerprint, normalize_serial, RevocationEntry};
