//! Parsed client certificates.
//!
//! Field names follow the usual short X.509 attribute names so a decoded
//! certificate can be passed straight through as JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// At most two issuer certificates above the leaf (root CA and sub-CA).
pub const MAX_CHAIN_LEN: usize = 2;

/// A subject or issuer distinguished name. Every attribute is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    #[serde(rename = "CN", default, skip_serializing_if = "Option::is_none")]
    pub cn: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    pub o: Option<String>,
    #[serde(rename = "OU", default, skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
    #[serde(rename = "ST", default, skip_serializing_if = "Option::is_none")]
    pub st: Option<String>,
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    pub l: Option<String>,
    #[serde(rename = "GN", default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(rename = "SN", default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "emailAddress", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Policy qualifier user notice, `key:value;key:value`.
    #[serde(rename = "id-qt-unotice", default, skip_serializing_if = "Option::is_none")]
    pub user_notice: Option<String>,
}

impl DistinguishedName {
    /// Email lowercased, if present.
    pub fn email_lowercase(&self) -> Option<String> {
        self.email.as_deref().map(str::to_ascii_lowercase)
    }

    /// The user notice as a lowercased key/value map. Pairs missing a key or
    /// a value are skipped.
    pub fn notice(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let Some(notice) = self.user_notice.as_deref() else {
            return out;
        };

        for pair in notice.split(';') {
            let mut kv = pair.split(':');
            let key = kv.next().unwrap_or_default();
            let value = kv.next().unwrap_or_default();
            if !key.is_empty() && !value.is_empty() {
                out.insert(key.to_ascii_lowercase(), value.to_ascii_lowercase());
            }
        }
        out
    }
}

/// An issuer certificate in the presented chain.
///
/// Serial and fingerprint can be absent when the TLS session was resumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCertificate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Ordered issuer chain, nearest issuer first, never longer than
/// [`MAX_CHAIN_LEN`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ChainCertificate>", into = "Vec<ChainCertificate>")]
pub struct IssuerChain(Vec<ChainCertificate>);

impl IssuerChain {
    pub fn new(certs: Vec<ChainCertificate>) -> Result<Self, String> {
        if certs.len() > MAX_CHAIN_LEN {
            return Err(format!(
                "certificate chain has {} issuers; at most {MAX_CHAIN_LEN} allowed",
                certs.len()
            ));
        }
        Ok(Self(certs))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainCertificate> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<ChainCertificate>> for IssuerChain {
    type Error = String;

    fn try_from(certs: Vec<ChainCertificate>) -> Result<Self, Self::Error> {
        Self::new(certs)
    }
}

impl From<IssuerChain> for Vec<ChainCertificate> {
    fn from(chain: IssuerChain) -> Self {
        chain.0
    }
}

/// A client certificate as decoded by the TLS terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(default)]
    pub subject: Option<DistinguishedName>,
    #[serde(default)]
    pub issuer: DistinguishedName,
    #[serde(rename = "serialNumber")]
    pub serial: String,
    pub fingerprint: String,
    #[serde(default)]
    pub chain: IssuerChain,
}

impl Certificate {
    /// Serial lowercased as presented.
    pub fn serial_lowercase(&self) -> String {
        self.serial.to_ascii_lowercase()
    }

    pub fn fingerprint_lowercase(&self) -> String {
        self.fingerprint.to_ascii_lowercase()
    }

    pub fn issuer_email(&self) -> Option<String> {
        self.issuer.email_lowercase()
    }

    /// Subject, or an empty name when the certificate has none.
    pub fn subject_or_default(&self) -> DistinguishedName {
        self.subject.clone().unwrap_or_default()
    }
}
