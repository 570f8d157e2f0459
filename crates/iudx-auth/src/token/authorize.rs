//! Request-time authorization of a token request.
//!
//! A request is a batch of resources; every `(resource, api, method)` triple
//! must be allowed by a grant or the whole batch is refused. Nothing is
//! written while authorizing.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::capability::CapabilityTable;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::grant::{ItemType, NO_ITEM};
use crate::identity::{ProviderId, ResourceId, Role};
use crate::input::{is_present, is_string_safe, parse_int};
use crate::policy::{self, GeoInfo, PolicyContext, Rule};
use crate::storage::{grants, tokens, users, Store};
use crate::trust::TrustDecision;

use super::types::RequestItem;

pub const NO_POLICY: &str = "Invalid 'id'; no access control policies have been set for this 'id' by the data provider";

/// Characters allowed in a resource id beyond the safe set.
const ID_EXCEPTIONS: &str = "*_";

/// An authorized batch, ready to be issued.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub request: Vec<RequestItem>,
    /// Granted validity in seconds.
    pub expiry: i64,
    /// Provider ids owning the requested resources.
    pub providers: BTreeSet<String>,
    /// Resource servers hosting the requested resources.
    pub servers: BTreeSet<String>,
}

/// One request entry after defaults are applied. `methods` and `apis` keep
/// their raw values; element types are checked during evaluation.
#[derive(Debug, Clone)]
struct Entry {
    resource: ResourceId,
    methods: Vec<Value>,
    apis: Vec<Value>,
    body: Option<Value>,
}

pub struct Authorizer<'a> {
    store: &'a Store,
    table: &'a CapabilityTable,
    config: &'a AuthConfig,
}

impl<'a> Authorizer<'a> {
    pub fn new(store: &'a Store, table: &'a CapabilityTable, config: &'a AuthConfig) -> Self {
        Self {
            store,
            table,
            config,
        }
    }

    /// Authorize a token request `body` for the certificate holder.
    pub fn authorize(
        &self,
        decision: &TrustDecision,
        ip: &str,
        geo: &GeoInfo,
        body: &Value,
        now: i64,
    ) -> Result<Authorization> {
        let consumer = decision.identity.as_str();

        self.store.with_conn(|conn| {
            let role_ids = users::approved_role_ids(conn, consumer, &Role::TOKEN_REQUESTERS)?;
            if role_ids.is_empty() {
                return Err(AuthError::NotAllowed("Not allowed!".into()));
            }

            let items = request_items(body.get("request"));
            if items.is_empty() {
                return Err(AuthError::invalid(
                    "'request' must be a valid JSON array with at least 1 element",
                ));
            }

            let requested_time = self.requested_token_time(body)?;
            self.check_rate(conn, consumer, ip, now)?;

            let ctx = PolicyContext::from_request(decision, ip, geo, now);

            let mut auth = Authorization {
                request: Vec::with_capacity(items.len()),
                expiry: self.config.max_token_time,
                providers: BTreeSet::new(),
                servers: BTreeSet::new(),
            };

            for item in items {
                let entry = normalize(item)?;
                auth.providers.insert(entry.resource.provider().to_string());
                auth.servers.insert(entry.resource.server().to_string());

                let (expiry, item) = self.evaluate_entry(conn, &ctx, &role_ids, entry)?;
                auth.expiry = auth.expiry.min(expiry);
                auth.request.push(item);
            }

            if let Some(t) = requested_time {
                auth.expiry = auth.expiry.min(t);
            }

            Ok(auth)
        })
    }

    fn requested_token_time(&self, body: &Value) -> Result<Option<i64>> {
        let Some(value) = body.get("token-time").filter(|v| !v.is_null()) else {
            return Ok(None);
        };

        let max = self.config.max_token_time;
        match parse_int(value) {
            Some(t) if (1..=max).contains(&t) => Ok(Some(t)),
            _ => Err(AuthError::invalid(format!(
                "'token-time' should be > 0 and < {max}"
            ))),
        }
    }

    fn check_rate(&self, conn: &Connection, consumer: &str, ip: &str, now: i64) -> Result<()> {
        let limit = &self.config.rate_limit;
        let issued = tokens::count_issued_since(conn, consumer, now - limit.window_secs)?;

        if issued > limit.max_tokens {
            log::error!("HIGH_TOKEN_RATE: Too many requests from user : {consumer}, from ip : {ip}");
            return Err(AuthError::RateLimited);
        }
        Ok(())
    }

    /// Evaluate every `(api, method)` pair of one entry; returns the
    /// smallest granted expiry and the entry as it will be stored.
    fn evaluate_entry(
        &self,
        conn: &Connection,
        ctx: &PolicyContext,
        role_ids: &[i64],
        mut entry: Entry,
    ) -> Result<(i64, RequestItem)> {
        let id = entry.resource.as_str().to_string();
        let no_policy = || AuthError::unauthorized(NO_POLICY, Some(json!(id)));

        let catalogue = entry.resource.server() == self.config.catalogue_server.to_ascii_lowercase();

        if catalogue {
            entry.apis = vec![json!("/*")];
        } else if entry.apis.len() == 1 && entry.apis[0] == "/*" {
            return Err(AuthError::invalid_with(
                "'apis' is required for this id",
                json!({ "id": id }),
            ));
        }

        let all_apis = if catalogue {
            Vec::new()
        } else {
            self.table
                .server(entry.resource.server())
                .ok_or_else(no_policy)?
                .all_apis(entry.resource.group())
        };

        let (provider_uid, item_type, item_id) = if catalogue {
            let provider = entry.resource.provider();
            let domain = provider.as_str().split('/').next().unwrap_or_default();
            let uid = users::users_in_domain(conn, domain)?
                .into_iter()
                .find(|(_, email)| ProviderId::from_email(email).as_ref() == Some(provider))
                .map(|(uid, _)| uid)
                .ok_or_else(no_policy)?;
            (uid, ItemType::Catalogue, NO_ITEM)
        } else {
            let (group_id, provider_uid) = grants::resource_group(conn, entry.resource.group())?
                .ok_or_else(no_policy)?;
            (provider_uid, ItemType::ResourceGroup, group_id)
        };

        let policies = grants::policies_for(conn, provider_uid, item_type, item_id, role_ids)?;
        if policies.is_empty() {
            return Err(no_policy());
        }
        let rules = policies
            .into_iter()
            .map(serde_json::from_value::<Rule>)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let target = entry.resource.policy_resource();
        let mut expiry = i64::MAX;
        let mut apis = Vec::with_capacity(entry.apis.len());

        for api in &entry.apis {
            let api = api.as_str().ok_or_else(|| {
                AuthError::invalid_with("'api' must be a string", json!({ "id": id, "api": api }))
            })?;

            if api != "/*" && !all_apis.iter().any(|a| a == api) {
                return Err(AuthError::invalid_with(
                    "Invalid api",
                    json!({ "id": id, "api": api }),
                ));
            }
            apis.push(api.to_string());

            for method in &entry.methods {
                let method = method.as_str().ok_or_else(|| {
                    AuthError::invalid_with(
                        "'method' must be a string",
                        json!({ "id": id, "method": method }),
                    )
                })?;

                let eval = policy::evaluate(&rules, &ctx.with_target(&target, api, method));
                if !eval.is_allowed() {
                    return Err(AuthError::unauthorized(
                        "Unauthorized",
                        Some(json!({ "id": id, "api": api, "method": method })),
                    ));
                }
                expiry = expiry.min(eval.expiry);
            }
        }

        let item = RequestItem {
            id,
            methods: string_list(&entry.methods),
            apis,
            body: entry.body,
        };
        Ok((expiry, item))
    }
}

/// The `request` field as a list: arrays as-is, anything else as a single
/// item.
fn request_items(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn string_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Apply defaults and shape checks to one request item.
fn normalize(item: &Value) -> Result<Entry> {
    let (id, obj) = match item {
        Value::String(id) => (id.as_str(), None),
        Value::Object(obj) => {
            if !is_present(obj.get("id")) {
                return Err(AuthError::invalid_with(
                    "no resource 'id' found in request",
                    item.clone(),
                ));
            }
            let id = obj.get("id").and_then(Value::as_str).ok_or_else(|| {
                AuthError::invalid_with(
                    "'id' contains unsafe characters",
                    obj.get("id").cloned().unwrap_or_default(),
                )
            })?;
            (id, Some(obj))
        }
        other => {
            return Err(AuthError::invalid_with(
                "Invalid resource 'id' found in request",
                Value::String(other.to_string()),
            ))
        }
    };

    if !is_string_safe(id, ID_EXCEPTIONS) || id.contains("..") {
        return Err(AuthError::invalid_with(
            "'id' contains unsafe characters",
            json!(id),
        ));
    }

    let field = |k: &str| obj.and_then(|o| o.get(k));

    let methods = list_field(id, field("method"), field("methods"), "*", "methods")?;
    let apis = list_field(id, field("api"), field("apis"), "/*", "apis")?;

    let resource = ResourceId::parse(id).ok_or_else(|| {
        AuthError::invalid_with("'id' must have at least 3 '/' characters.", json!(id))
    })?;

    let body = match field("body") {
        Some(b) if is_present(Some(b)) => {
            if !b.is_object() {
                return Err(AuthError::invalid_with(
                    "'body' must be a valid JSON object",
                    json!({ "id": id, "body": b }),
                ));
            }
            Some(b.clone())
        }
        _ => None,
    };

    Ok(Entry {
        resource,
        methods,
        apis,
        body,
    })
}

/// Resolve the singular/plural pair of a list field (`method`/`methods`,
/// `api`/`apis`). An empty list takes the default.
fn list_field(
    id: &str,
    single: Option<&Value>,
    plural: Option<&Value>,
    default: &str,
    name: &str,
) -> Result<Vec<Value>> {
    if let Some(Value::String(s)) = single {
        if !s.is_empty() {
            return Ok(vec![Value::String(s.clone())]);
        }
    }

    match plural {
        Some(Value::Array(items)) if !items.is_empty() => Ok(items.clone()),
        Some(Value::Array(_)) => Ok(vec![Value::String(default.to_string())]),
        Some(other) if is_present(Some(other)) => {
            let mut input = Map::new();
            input.insert("id".into(), json!(id));
            input.insert(name.into(), other.clone());
            Err(AuthError::invalid_with(
                format!("'{name}' must be a valid JSON array"),
                Value::Object(input),
            ))
        }
        _ => Ok(vec![Value::String(default.to_string())]),
    }
}
