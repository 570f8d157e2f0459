//! The attribute bag a policy is evaluated against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trust::TrustDecision;

/// A condition attribute or literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Num(f64),
    Str(String),
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        Self::Num(n as f64)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

/// Location of the caller's address as resolved by the GeoIP lookup.
///
/// Only stable fields are kept; `eu`, `area`, `metro` and `range` are
/// dropped from the raw record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Latitude and longitude.
    #[serde(default)]
    pub ll: Vec<f64>,
}

impl GeoInfo {
    /// Keep the stable fields of a raw lookup result. Anything that is not
    /// an object yields an empty record.
    pub fn from_record(record: &Value) -> Self {
        let field = |name: &str| record.get(name).and_then(Value::as_str).map(str::to_string);
        let ll = record
            .get("ll")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        Self {
            country: field("country"),
            region: field("region"),
            timezone: field("timezone"),
            city: field("city"),
            ll,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.ll.first().copied().unwrap_or(0.0)
    }

    pub fn longitude(&self) -> f64 {
        self.ll.get(1).copied().unwrap_or(0.0)
    }
}

/// Immutable per-request attributes plus the per-evaluation target.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyContext {
    pub principal: String,
    pub action: String,
    /// `server/name` of the resource being evaluated.
    pub resource: String,
    pub conditions: BTreeMap<String, AttrValue>,
}

impl PolicyContext {
    /// An empty context for `principal`.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            action: "access".into(),
            resource: String::new(),
            conditions: BTreeMap::new(),
        }
    }

    /// Build the request-wide context from a trust decision.
    pub fn from_request(decision: &TrustDecision, ip: &str, geo: &GeoInfo, now: i64) -> Self {
        let subject = decision.certificate.subject_or_default();
        let issuer = &decision.certificate.issuer;
        let text = |v: &Option<String>| AttrValue::Str(v.clone().unwrap_or_default());

        let mut c = BTreeMap::new();
        c.insert("ip".into(), AttrValue::from(ip));
        c.insert("time".into(), AttrValue::from(now));
        c.insert("cert.class".into(), AttrValue::from(i64::from(decision.class)));

        c.insert("cert.cn".into(), text(&subject.cn));
        c.insert("cert.o".into(), text(&subject.o));
        c.insert("cert.ou".into(), text(&subject.ou));
        c.insert("cert.c".into(), text(&subject.c));
        c.insert("cert.st".into(), text(&subject.st));
        c.insert("cert.gn".into(), text(&subject.given_name));
        c.insert("cert.sn".into(), text(&subject.surname));
        c.insert("cert.title".into(), text(&subject.title));

        c.insert("cert.issuer.cn".into(), text(&issuer.cn));
        c.insert("cert.issuer.email".into(), text(&issuer.email));
        c.insert("cert.issuer.o".into(), text(&issuer.o));
        c.insert("cert.issuer.ou".into(), text(&issuer.ou));
        c.insert("cert.issuer.c".into(), text(&issuer.c));
        c.insert("cert.issuer.st".into(), text(&issuer.st));

        c.insert("country".into(), text(&geo.country));
        c.insert("region".into(), text(&geo.region));
        c.insert("timezone".into(), text(&geo.timezone));
        c.insert("city".into(), text(&geo.city));
        c.insert("latitude".into(), AttrValue::from(geo.latitude()));
        c.insert("longitude".into(), AttrValue::from(geo.longitude()));

        Self {
            principal: decision.identity.clone(),
            action: "access".into(),
            resource: String::new(),
            conditions: c,
        }
    }

    /// A copy aimed at one `(resource, api, method)` triple.
    pub fn with_target(&self, resource: &str, api: &str, method: &str) -> Self {
        let mut ctx = self.clone();
        ctx.resource = resource.to_string();
        ctx.conditions.insert("api".into(), AttrValue::from(api));
        ctx.conditions.insert("method".into(), AttrValue::from(method));
        ctx
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<AttrValue> {
        match name {
            "principal" => Some(AttrValue::from(self.principal.as_str())),
            "resource" => Some(AttrValue::from(self.resource.as_str())),
            other => self.conditions.get(other).cloned(),
        }
    }
}
