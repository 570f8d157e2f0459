//! Certificate revocation list entries and matching.

use serde::{Deserialize, Serialize};

use super::certificate::Certificate;

/// One revoked certificate, identified by issuer email, serial and
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub issuer: String,
    pub serial: String,
    pub fingerprint: String,
}

impl RevocationEntry {
    pub fn new(
        issuer: impl Into<String>,
        serial: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            serial: serial.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Lowercase everything, strip `:` from the fingerprint and leading
    /// zeros from the serial.
    pub fn normalized(&self) -> Self {
        Self {
            issuer: self.issuer.to_ascii_lowercase(),
            serial: normalize_serial(&self.serial),
            fingerprint: normalize_fingerprint(&self.fingerprint),
        }
    }
}

pub fn normalize_serial(serial: &str) -> String {
    serial.to_ascii_lowercase().trim_start_matches('0').to_string()
}

pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint.to_ascii_lowercase().replace(':', "")
}

/// Check a certificate against the revocation list.
///
/// When the certificate was issued by a sub-CA, each certificate of its
/// issuer chain is also checked against the entries issued by
/// `chain_root_ca_email`.
pub fn is_revoked(
    cert: &Certificate,
    crl: &[RevocationEntry],
    sub_ca_prefix: &str,
    chain_root_ca_email: &str,
) -> bool {
    let issuer = cert.issuer_email().unwrap_or_default();
    let serial = normalize_serial(&cert.serial);
    let fingerprint = normalize_fingerprint(&cert.fingerprint);

    let crl: Vec<RevocationEntry> = crl.iter().map(RevocationEntry::normalized).collect();

    let leaf_revoked = crl
        .iter()
        .any(|c| c.issuer == issuer && c.serial == serial && c.fingerprint == fingerprint);
    if leaf_revoked {
        return true;
    }

    if !issuer.starts_with(sub_ca_prefix) {
        return false;
    }

    let root = chain_root_ca_email.to_ascii_lowercase();
    cert.chain.iter().any(|link| {
        // Resumed sessions do not carry the chain details.
        let (Some(link_serial), Some(link_fingerprint)) = (&link.serial, &link.fingerprint) else {
            return false;
        };
        let link_serial = normalize_serial(link_serial);
        let link_fingerprint = normalize_fingerprint(link_fingerprint);

        crl.iter().any(|c| {
            c.issuer == root && c.serial == link_serial && c.fingerprint == link_fingerprint
        })
    })
}
