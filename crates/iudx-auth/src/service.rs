//! The authorization service: one entry point per endpoint, plus request
//! dispatch for transports.
//!
//! Every call starts by evaluating the caller's certificate against a
//! freshly loaded revocation list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::capability::CapabilityTable;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::grant::{resolve_owner, DelegatingProvider, GrantListing, GrantManager, Owner};
use crate::identity::Role;
use crate::policy::GeoInfo;
use crate::response::Response;
use crate::storage::{crl, users, Store};
use crate::time::now_secs;
use crate::token::{self, Authorizer, AuditReport, Introspection, IssuedToken, Origin};
use crate::trust::{self, Certificate, Endpoint, TrustAnchors, TrustDecision};

/// Header naming the provider a delegate acts for.
pub const PROVIDER_EMAIL_HEADER: &str = "provider-email";

/// One request as handed over by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    pub certificate: Certificate,
    #[serde(default)]
    pub ip: String,
    /// `Origin` header of the call.
    #[serde(default)]
    pub origin: Option<String>,
    /// Raw GeoIP record of `ip`.
    #[serde(default)]
    pub geo: Value,
    /// Lowercased header names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

fn default_method() -> String {
    "POST".into()
}

impl ServiceRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateInfo {
    pub id: String,
    pub user_name: Value,
    #[serde(rename = "certificate-class")]
    pub certificate_class: u8,
    pub serial: String,
    pub fingerprint: String,
    pub roles: Vec<Role>,
}

/// Shared, immutable service state.
#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
    store: Store,
    table: CapabilityTable,
    anchors: TrustAnchors,
}

impl AuthService {
    pub fn new(config: AuthConfig, store: Store, table: CapabilityTable) -> Self {
        let anchors = TrustAnchors::from_config(&config);
        Self {
            config,
            store,
            table,
            anchors,
        }
    }

    /// Open the store and load the capability table named by `config`.
    pub fn open(config: AuthConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        let table = CapabilityTable::load(&config.capabilities_path)?;
        Ok(Self::new(config, store, table))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.table
    }

    /// Evaluate `cert` for a call to `endpoint`.
    pub fn authenticate(&self, cert: &Certificate, endpoint: Endpoint) -> Result<TrustDecision> {
        let crl = self.store.with_conn(crl::load)?;
        Ok(trust::evaluate(cert, &crl, endpoint, &self.anchors)?)
    }

    // ── Tokens ───────────────────────────────────────────────────────────────

    pub fn issue_token(
        &self,
        decision: &TrustDecision,
        ip: &str,
        origin: Origin,
        body: &Value,
        now: i64,
    ) -> Result<IssuedToken> {
        let authorizer = Authorizer::new(&self.store, &self.table, &self.config);
        let auth = authorizer.authorize(decision, ip, &origin.geo, body, now)?;
        token::issue(&self.store, &self.config, decision, auth, origin, now)
    }

    pub fn introspect(
        &self,
        decision: &TrustDecision,
        body: &Value,
        now: i64,
    ) -> Result<Introspection> {
        token::introspect(&self.store, &self.config, decision, body, now)
    }

    pub fn revoke(&self, decision: &TrustDecision, body: &Value, now: i64) -> Result<usize> {
        token::revoke(
            &self.store,
            &self.config.server_name,
            &decision.identity,
            body,
            now,
        )
    }

    pub fn revoke_all(&self, decision: &TrustDecision, body: &Value, now: i64) -> Result<usize> {
        token::revoke_all(&self.store, &decision.identity, body, now)
    }

    pub fn audit_tokens(
        &self,
        decision: &TrustDecision,
        body: &Value,
        now: i64,
    ) -> Result<AuditReport> {
        token::audit(&self.store, &decision.identity, body, now)
    }

    pub fn certificate_info(&self, decision: &TrustDecision) -> Result<CertificateInfo> {
        let profile = self
            .store
            .with_conn(|conn| users::profile(conn, &decision.identity))?;

        let (user_name, roles) = match profile {
            Some((name, mut roles)) => {
                roles.dedup();
                (serde_json::to_value(name)?, roles)
            }
            None => (json!({}), Vec::new()),
        };

        Ok(CertificateInfo {
            id: decision.identity.clone(),
            user_name,
            certificate_class: decision.class,
            serial: decision.certificate.serial_lowercase(),
            fingerprint: decision.certificate.fingerprint_lowercase(),
            roles,
        })
    }

    // ── Grants ───────────────────────────────────────────────────────────────

    fn grants(&self) -> GrantManager<'_> {
        GrantManager::new(&self.store, &self.table, &self.config)
    }

    /// Resolve the provider the caller acts for.
    pub fn owner(&self, decision: &TrustDecision, provider_email: Option<&str>) -> Result<Owner> {
        self.store
            .with_conn(|conn| resolve_owner(conn, &decision.identity, provider_email))
    }

    pub fn create_grants(&self, owner: &Owner, body: &Value) -> Result<()> {
        self.grants().create_grants(owner, body)
    }

    pub fn list_grants(&self, owner: &Owner) -> Result<Vec<GrantListing>> {
        self.grants().list_grants(owner)
    }

    pub fn delete_grants(&self, owner: &Owner, body: &Value) -> Result<()> {
        self.grants().delete_grants(owner, body)
    }

    pub fn delegate_providers(&self, decision: &TrustDecision) -> Result<Vec<DelegatingProvider>> {
        self.grants().delegate_providers(&decision.identity)
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Serve one request end to end.
    pub fn handle(&self, req: &ServiceRequest) -> Response {
        match self.dispatch(req, now_secs()) {
            Ok(body) => Response::success(body),
            Err(e) => Response::from_error(&e),
        }
    }

    fn dispatch(&self, req: &ServiceRequest, now: i64) -> Result<Option<Value>> {
        let no_route = || AuthError::NotFound("No such API".into());

        let endpoint = Endpoint::from_path(&req.path).ok_or_else(no_route)?;
        let method = req.method.to_ascii_uppercase();
        let decision = self.authenticate(&req.certificate, endpoint)?;

        let body = match (endpoint, method.as_str()) {
            (Endpoint::Token, "POST") => {
                let origin = Origin {
                    geo: GeoInfo::from_record(&req.geo),
                    api_called_from: req.origin.clone(),
                };
                let issued = self.issue_token(&decision, &req.ip, origin, &req.body, now)?;
                Some(serde_json::to_value(issued)?)
            }
            (Endpoint::Introspect, "POST") => {
                Some(serde_json::to_value(self.introspect(&decision, &req.body, now)?)?)
            }
            (Endpoint::Revoke, "POST") => {
                let n = self.revoke(&decision, &req.body, now)?;
                Some(json!({ "num-tokens-revoked": n }))
            }
            (Endpoint::RevokeAll, "POST") => {
                let n = self.revoke_all(&decision, &req.body, now)?;
                Some(json!({ "num-tokens-revoked": n }))
            }
            (Endpoint::Audit, "POST") => {
                Some(serde_json::to_value(self.audit_tokens(&decision, &req.body, now)?)?)
            }
            (Endpoint::CertificateInfo, "POST" | "GET") => {
                Some(serde_json::to_value(self.certificate_info(&decision)?)?)
            }
            (Endpoint::ProviderAccess, "POST" | "GET" | "DELETE") => {
                let owner = self.owner(&decision, req.header(PROVIDER_EMAIL_HEADER))?;
                match method.as_str() {
                    "POST" => {
                        self.create_grants(&owner, &req.body)?;
                        None
                    }
                    "DELETE" => {
                        self.delete_grants(&owner, &req.body)?;
                        None
                    }
                    _ => Some(serde_json::to_value(self.list_grants(&owner)?)?),
                }
            }
            (Endpoint::DelegateProviders, "GET" | "POST") => {
                Some(serde_json::to_value(self.delegate_providers(&decision)?)?)
            }
            _ => return Err(no_route()),
        };

        Ok(body)
    }
}
