//! Trust evaluation: turning a presented certificate into a class and an
//! identity for one endpoint call.
//!
//! Two paths exist:
//! 1. Platform-issued: the issuer is a platform root CA or sub-CA. The class
//!    comes from the subject's user notice, emails are validated, and the
//!    revocation list is consulted.
//! 2. Foreign: any other CA. Class 1 by default, class 2 when the subject
//!    carries a valid email.

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::identity::{email_domain, is_valid_email};

use super::certificate::Certificate;
use super::revocation::{is_revoked, RevocationEntry};

/// Endpoints that evaluate a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    Token,
    Introspect,
    CertificateInfo,
    Audit,
    Revoke,
    RevokeAll,
    ProviderAccess,
    DelegateProviders,
}

impl Endpoint {
    /// Minimum certificate class, or `None` when any class is accepted.
    pub fn min_class(self) -> Option<u8> {
        match self {
            Self::Introspect | Self::CertificateInfo => Some(1),
            Self::Token => Some(2),
            Self::Audit | Self::Revoke | Self::RevokeAll => Some(3),
            Self::ProviderAccess | Self::DelegateProviders => None,
        }
    }

    /// Map a request path (any `/v1/` or `/v2/` version) to an endpoint.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or_default();
        let path = path.replacen("/v2/", "/v1/", 1);
        match path.as_str() {
            "/auth/v1/token" => Some(Self::Token),
            "/auth/v1/token/introspect" => Some(Self::Introspect),
            "/auth/v1/certificate-info" => Some(Self::CertificateInfo),
            "/auth/v1/audit/tokens" => Some(Self::Audit),
            "/auth/v1/token/revoke" => Some(Self::Revoke),
            "/auth/v1/token/revoke-all" => Some(Self::RevokeAll),
            "/auth/v1/provider/access" => Some(Self::ProviderAccess),
            "/auth/v1/delegate/providers" => Some(Self::DelegateProviders),
            _ => None,
        }
    }

    fn is_class_one_only(self) -> bool {
        self.min_class() == Some(1) && self != Self::CertificateInfo
    }
}

/// The CAs trusted as platform issuers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchors {
    pub root_ca_emails: Vec<String>,
    pub chain_root_ca_email: String,
    pub sub_ca_prefix: String,
}

impl TrustAnchors {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            root_ca_emails: config
                .root_ca_emails
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            chain_root_ca_email: config.chain_root_ca_email.to_ascii_lowercase(),
            sub_ca_prefix: config.sub_ca_prefix.to_ascii_lowercase(),
        }
    }

    /// Is this issuer email one of ours?
    pub fn is_platform_issuer(&self, issuer_email: &str) -> bool {
        let email = issuer_email.to_ascii_lowercase();
        self.root_ca_emails.iter().any(|e| *e == email) || email.starts_with(&self.sub_ca_prefix)
    }
}

impl Default for TrustAnchors {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustDecision {
    pub class: u8,
    /// Lowercased subject email; empty for foreign certificates without one.
    pub identity: String,
    pub common_name: String,
    pub certificate: Certificate,
    pub platform_issued: bool,
}

impl TrustDecision {
    /// Name used in logs and rate limiting: the identity, else the CN.
    pub fn caller_name(&self) -> String {
        if self.identity.is_empty() {
            self.common_name.to_ascii_lowercase()
        } else {
            self.identity.clone()
        }
    }
}

/// Why a certificate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrustError {
    #[error("No subject found in the certificate")]
    MissingSubject,

    #[error("No CN found in the certificate")]
    MissingCommonName,

    #[error("Invalid certificate class")]
    InvalidClass,

    #[error("A class-{0} or above certificate is required to call this API")]
    ClassRequired(u8),

    #[error("A class-1 certificate is required to call this API")]
    ClassOneRequired,

    #[error("Invalid 'emailAddress' field in the certificate")]
    InvalidSubjectEmail,

    #[error("Certificate issuer has no 'emailAddress' field")]
    MissingIssuerEmail,

    #[error("Certificate issuer's emailAddress is invalid")]
    InvalidIssuerEmail,

    #[error("Invalid certificate issuer")]
    FraudulentIssuer,

    #[error("Certificate has been revoked")]
    Revoked,
}

impl From<TrustError> for AuthError {
    fn from(e: TrustError) -> Self {
        match e {
            TrustError::Revoked => AuthError::CertificateRevoked,
            TrustError::InvalidClass
            | TrustError::ClassRequired(_)
            | TrustError::ClassOneRequired => AuthError::InsufficientClass(e.to_string()),
            other => AuthError::Certificate(other.to_string()),
        }
    }
}

/// Evaluate `cert` for a call to `endpoint`.
///
/// `crl` must be freshly loaded for this call.
pub fn evaluate(
    cert: &Certificate,
    crl: &[RevocationEntry],
    endpoint: Endpoint,
    anchors: &TrustAnchors,
) -> Result<TrustDecision, TrustError> {
    let subject = cert.subject.as_ref().ok_or(TrustError::MissingSubject)?;
    let common_name = subject
        .cn
        .clone()
        .filter(|cn| !cn.is_empty())
        .ok_or(TrustError::MissingCommonName)?;

    let issuer_email = cert.issuer_email().unwrap_or_default();
    if anchors.is_platform_issuer(&issuer_email) {
        evaluate_platform(cert, crl, endpoint, anchors, common_name)
    } else {
        evaluate_foreign(cert, endpoint, common_name)
    }
}

fn evaluate_platform(
    cert: &Certificate,
    crl: &[RevocationEntry],
    endpoint: Endpoint,
    anchors: &TrustAnchors,
    common_name: String,
) -> Result<TrustDecision, TrustError> {
    let subject = cert.subject_or_default();

    let class = subject
        .notice()
        .get("class")
        .and_then(|c| c.parse::<u8>().ok())
        .unwrap_or(0);

    if class < 1 {
        return Err(TrustError::InvalidClass);
    }

    if let Some(min) = endpoint.min_class() {
        if class < min {
            return Err(TrustError::ClassRequired(min));
        }
    }

    if endpoint.is_class_one_only() && class != 1 {
        return Err(TrustError::ClassOneRequired);
    }

    let subject_email = subject.email.clone().unwrap_or_default();
    if !is_valid_email(&subject_email) {
        return Err(TrustError::InvalidSubjectEmail);
    }

    let issuer_email = cert.issuer_email().ok_or(TrustError::MissingIssuerEmail)?;
    if !is_valid_email(&issuer_email) {
        return Err(TrustError::InvalidIssuerEmail);
    }

    if issuer_email.starts_with(&anchors.sub_ca_prefix) {
        let issued_to = email_domain(&subject_email);
        let issuer_domain = email_domain(&issuer_email);

        if issued_to != issuer_domain {
            log::error!(
                "Invalid certificate: issuer = {} and issued to = {}",
                issuer_domain.unwrap_or_default(),
                subject_email
            );
            return Err(TrustError::FraudulentIssuer);
        }
    }

    if is_revoked(
        cert,
        crl,
        &anchors.sub_ca_prefix,
        &anchors.chain_root_ca_email,
    ) {
        return Err(TrustError::Revoked);
    }

    Ok(TrustDecision {
        class,
        identity: subject_email.to_ascii_lowercase(),
        common_name,
        certificate: cert.clone(),
        platform_issued: true,
    })
}

fn evaluate_foreign(
    cert: &Certificate,
    endpoint: Endpoint,
    common_name: String,
) -> Result<TrustDecision, TrustError> {
    let subject_email = cert
        .subject
        .as_ref()
        .and_then(|s| s.email.clone())
        .unwrap_or_default();

    let (mut class, identity) = if is_valid_email(&subject_email) {
        (2, subject_email.to_ascii_lowercase())
    } else {
        (1, String::new())
    };

    if endpoint.is_class_one_only() {
        class = 1;
    }

    if let Some(min) = endpoint.min_class() {
        if class < min {
            return Err(TrustError::ClassRequired(min));
        }
    }

    Ok(TrustDecision {
        class,
        identity,
        common_name,
        certificate: cert.clone(),
        platform_issued: false,
    })
}
