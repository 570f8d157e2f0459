//! Batch grant management.
//!
//! Every batch is validated in full before anything is written; the writes
//! then run in a single transaction that re-checks the state it depends on.

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::capability::{CapabilitySet, CapabilityTable, ServerCapabilities};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::identity::{is_valid_email, ProviderId, Role};
use crate::input::is_string_safe;
use crate::storage::{grants, users, Store};

use super::policy_text::{catalogue_rule, compile, resource_rule};
use super::types::{
    DeleteRequest, DelegatingProvider, GrantListing, GrantRequest, ItemType, MAX_GRANT_ID, NO_ITEM,
};

/// The single capability of the data ingester role.
const INGESTER_CAPABILITY: &str = "default";

/// The provider a grant operation acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub user_id: i64,
    pub email: String,
    pub provider_id: ProviderId,
    /// True when a delegate performs the operation.
    pub delegated: bool,
    /// Identity of the caller.
    pub performed_by: String,
}

/// Resolve the acting provider.
///
/// A caller holding an approved provider role acts for itself. Otherwise
/// the caller must be an approved delegate holding an active delegate
/// grant from `provider_email`.
pub fn resolve_owner(
    conn: &Connection,
    caller_email: &str,
    provider_email: Option<&str>,
) -> Result<Owner> {
    if let Some(user_id) = users::approved_user(conn, caller_email, Role::Provider)? {
        return owner(user_id, caller_email, false, caller_email);
    }

    let provider_email = provider_email
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| AuthError::invalid("Invalid data (provider_email)"))?;

    let not_allowed = || AuthError::NotAllowed("Not allowed".into());

    let provider_uid =
        users::approved_user(conn, provider_email, Role::Provider)?.ok_or_else(not_allowed)?;
    let delegate_uid =
        users::approved_user(conn, caller_email, Role::Delegate)?.ok_or_else(not_allowed)?;
    grants::delegate_grant_role(conn, provider_uid, delegate_uid)?.ok_or_else(not_allowed)?;

    owner(provider_uid, provider_email, true, caller_email)
}

fn owner(user_id: i64, email: &str, delegated: bool, performed_by: &str) -> Result<Owner> {
    let email = email.to_ascii_lowercase();
    let provider_id = ProviderId::from_email(&email)
        .ok_or_else(|| AuthError::invalid("Invalid data (provider_email)"))?;
    Ok(Owner {
        user_id,
        email,
        provider_id,
        delegated,
        performed_by: performed_by.to_ascii_lowercase(),
    })
}

/// A create item that passed validation.
#[derive(Debug, Clone)]
struct PendingGrant {
    grantee_email: String,
    grantee_uid: i64,
    role: Role,
    item_type: ItemType,
    /// Resource group id for resource-scoped grants.
    cat_id: Option<String>,
    server: Option<String>,
    capabilities: CapabilitySet,
}

/// A delete item that passed validation.
#[derive(Debug, Clone)]
struct PendingDelete {
    id: i64,
    /// `None` deletes the whole grant.
    capabilities: Option<Vec<String>>,
}

/// Grant operations over one store and capability table.
pub struct GrantManager<'a> {
    store: &'a Store,
    table: &'a CapabilityTable,
    config: &'a AuthConfig,
}

impl<'a> GrantManager<'a> {
    pub fn new(store: &'a Store, table: &'a CapabilityTable, config: &'a AuthConfig) -> Self {
        Self {
            store,
            table,
            config,
        }
    }

    // ── Create ───────────────────────────────────────────────────────────────

    /// Create every grant in `body` (a JSON array) or none of them.
    pub fn create_grants(&self, owner: &Owner, body: &Value) -> Result<()> {
        let items = body
            .as_array()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AuthError::invalid("Invalid data (body)"))?;

        let pending = self.store.with_conn(|conn| {
            let mut pending: Vec<PendingGrant> = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let req = GrantRequest::from_value(item);
                let p = self
                    .validate_create(conn, owner, &req)
                    .map_err(|e| e.at_index(index))?;
                check_create_siblings(&pending, &p).map_err(|e| e.at_index(index))?;
                pending.push(p);
            }
            Ok(pending)
        })?;

        self.store.with_transaction(|conn| {
            for (index, p) in pending.iter().enumerate() {
                self.write_grant(conn, owner, p)
                    .map_err(|e| if e.is_internal() { e } else { e.at_index(index) })?;
            }
            Ok(())
        })?;

        for p in &pending {
            let capabilities = p.server.as_deref().and_then(|s| self.table.server(s)).map(|s| {
                s.consumer_names(p.capabilities)
            });
            log::info!(
                "CREATED_POLICY: {}",
                json!({
                    "provider": owner.email,
                    "accesser": p.grantee_email,
                    "role": p.role.as_str(),
                    "resource_id": p.cat_id,
                    "capabilities": capabilities.filter(|c| !c.is_empty()),
                    "delegated": owner.delegated,
                    "performed_by": owner.performed_by,
                })
            );
        }

        Ok(())
    }

    fn validate_create(
        &self,
        conn: &Connection,
        owner: &Owner,
        req: &GrantRequest,
    ) -> Result<PendingGrant> {
        let grantee_email = req
            .user_email
            .as_deref()
            .filter(|e| is_valid_email(e))
            .ok_or_else(|| AuthError::invalid("Invalid data (email)"))?
            .to_ascii_lowercase();

        let role = req
            .user_role
            .as_deref()
            .and_then(|r| r.parse::<Role>().ok())
            .filter(|r| Role::GRANTABLE.contains(r))
            .ok_or_else(|| AuthError::invalid("Invalid data (role)"))?;

        let grantee_uid = users::approved_user(conn, &grantee_email, role)?
            .ok_or_else(|| AuthError::unauthorized("Invalid accesser", None))?;

        let mut pending = PendingGrant {
            grantee_email,
            grantee_uid,
            role,
            item_type: ItemType::ResourceGroup,
            cat_id: None,
            server: None,
            capabilities: CapabilitySet::EMPTY,
        };

        let item_id = match role {
            Role::Consumer | Role::DataIngester => {
                let (cat_id, server) = self.validate_resource_item(owner, req)?;
                let server_caps = self.server_caps(&server)?;

                let granted = if role == Role::Consumer {
                    pending.capabilities = parse_capabilities(req.capabilities.as_ref(), server_caps)?;
                    server_caps.consumer_names(pending.capabilities)
                } else {
                    vec![INGESTER_CAPABILITY.to_string()]
                };
                if server_caps.apis_for(role.as_str(), &granted, &cat_id).is_none() {
                    return Err(AuthError::invalid("Invalid data (capabilities)"));
                }

                let item_id = grants::resource_group_id(conn, &cat_id)?;
                pending.cat_id = Some(cat_id);
                pending.server = Some(server);
                item_id
            }
            Role::Onboarder => {
                pending.item_type = ItemType::Catalogue;
                Some(NO_ITEM)
            }
            Role::Delegate => {
                if owner.delegated {
                    return Err(AuthError::unauthorized("Delegate cannot set delegate rule", None));
                }
                pending.item_type = ItemType::ProviderCaps;
                Some(NO_ITEM)
            }
            Role::Provider | Role::Admin => return Err(AuthError::invalid("Invalid data (role)")),
        };

        if let Some(item_id) = item_id {
            if let Some(existing) = grants::active_grant_for(
                conn,
                owner.user_id,
                grantee_uid,
                pending.item_type,
                item_id,
                role,
            )? {
                if role != Role::Consumer {
                    return Err(AuthError::Conflict("Rule exists".into()));
                }
                let server = self.server_caps(pending.server.as_deref().unwrap_or_default())?;
                let existing = stored_capabilities(conn, server, existing)?;
                let duplicate = existing.intersection(pending.capabilities);
                if !duplicate.is_empty() {
                    return Err(AuthError::Conflict(format!(
                        "Rule exists for {}",
                        server.consumer_names(duplicate).join(",")
                    )));
                }
            }
        }

        Ok(pending)
    }

    /// Validate the item of a resource-scoped grant. Returns the resource
    /// group id with its provider and server parts lowercased, and the
    /// server.
    fn validate_resource_item(&self, owner: &Owner, req: &GrantRequest) -> Result<(String, String)> {
        let invalid_item = || AuthError::invalid("Invalid data (item-id)");

        let item_id = req.item_id.as_deref().ok_or_else(invalid_item)?;

        if req.item_type.as_deref() != Some(ItemType::ResourceGroup.as_str()) {
            return Err(AuthError::invalid("Invalid data (item-type)"));
        }

        if !is_string_safe(item_id, "_") || item_id.contains("..") {
            return Err(invalid_item());
        }

        let parts: Vec<&str> = item_id.split('/').collect();
        if parts.len() != 4 {
            return Err(invalid_item());
        }

        let cat_id = format!(
            "{}/{}/{}/{}",
            parts[0].to_ascii_lowercase(),
            parts[1].to_ascii_lowercase(),
            parts[2].to_ascii_lowercase(),
            parts[3]
        );

        if !cat_id.starts_with(&format!("{}/", owner.provider_id)) {
            return Err(AuthError::unauthorized(
                "Provider does not match resource owner",
                None,
            ));
        }

        let server = parts[2].to_ascii_lowercase();
        if self.table.server(&server).is_none() {
            return Err(invalid_item());
        }

        Ok((cat_id, server))
    }

    fn server_caps(&self, server: &str) -> Result<&'a ServerCapabilities> {
        self.table
            .server(server)
            .ok_or_else(|| AuthError::invalid("Invalid data (item-id)"))
    }

    fn write_grant(&self, conn: &Connection, owner: &Owner, p: &PendingGrant) -> Result<()> {
        let item_id = match &p.cat_id {
            Some(cat_id) => grants::resolve_or_insert_resource_group(conn, owner.user_id, cat_id)?,
            None => NO_ITEM,
        };

        let role_id = users::role_id(conn, p.grantee_uid, p.role)?
            .ok_or_else(|| AuthError::StorageError("grantee role vanished".into()))?;

        let existing = grants::active_grant_for(
            conn,
            owner.user_id,
            p.grantee_uid,
            p.item_type,
            item_id,
            p.role,
        )?;

        let (policy_text, policy_json) = match p.role {
            Role::Consumer => {
                let server = self.server_caps(p.server.as_deref().unwrap_or_default())?;
                let current = match existing {
                    Some(id) => stored_capabilities(conn, server, id)?,
                    None => CapabilitySet::EMPTY,
                };

                let duplicate = current.intersection(p.capabilities);
                if !duplicate.is_empty() {
                    return Err(AuthError::Conflict(format!(
                        "Rule exists for {}",
                        server.consumer_names(duplicate).join(",")
                    )));
                }

                let all = server.consumer_names(current.union(p.capabilities));
                self.resource_policy(owner, p, Role::Consumer, &all)?
            }
            Role::DataIngester => {
                if existing.is_some() {
                    return Err(AuthError::Conflict("Rule exists".into()));
                }
                self.resource_policy(owner, p, Role::DataIngester, &[INGESTER_CAPABILITY])?
            }
            Role::Onboarder => {
                if existing.is_some() {
                    return Err(AuthError::Conflict("Rule exists".into()));
                }
                let text = catalogue_rule(&p.grantee_email, &self.config.catalogue_resource());
                let json = compile(&text)?;
                (text, json)
            }
            _ => {
                if existing.is_some() {
                    return Err(AuthError::Conflict("Rule exists".into()));
                }
                (String::new(), json!({}))
            }
        };

        let access_id = match existing {
            Some(id) if p.role == Role::Consumer => {
                grants::update_policy(conn, id, &policy_text, &policy_json)?;
                id
            }
            _ => grants::insert_grant(
                conn,
                &grants::NewGrant {
                    provider_id: owner.user_id,
                    role_id,
                    policy_text: &policy_text,
                    policy_json: &policy_json,
                    item_id,
                    item_type: p.item_type,
                },
            )?,
        };

        if p.role == Role::Consumer {
            let server = self.server_caps(p.server.as_deref().unwrap_or_default())?;
            for name in server.consumer_names(p.capabilities) {
                grants::insert_capability(conn, access_id, &name)?;
            }
        }

        Ok(())
    }

    fn resource_policy<S: AsRef<str>>(
        &self,
        owner: &Owner,
        p: &PendingGrant,
        role: Role,
        capabilities: &[S],
    ) -> Result<(String, Value)> {
        let cat_id = p.cat_id.as_deref().unwrap_or_default();
        let server = self.server_caps(p.server.as_deref().unwrap_or_default())?;
        let resource_name = cat_id
            .strip_prefix(&format!("{}/", owner.provider_id))
            .unwrap_or(cat_id);

        let text = server
            .apis_for(role.as_str(), capabilities, cat_id)
            .and_then(|apis| resource_rule(&p.grantee_email, resource_name, &apis))
            .ok_or_else(|| AuthError::invalid("Invalid data (capabilities)"))?;
        let json = compile(&text)?;
        Ok((text, json))
    }

    // ── List ─────────────────────────────────────────────────────────────────

    pub fn list_grants(&self, owner: &Owner) -> Result<Vec<GrantListing>> {
        self.store.with_conn(|conn| grants::list_grants(conn, owner.user_id))
    }

    // ── Delete ───────────────────────────────────────────────────────────────

    /// Delete every grant (or capability subset) in `body` or none.
    pub fn delete_grants(&self, owner: &Owner, body: &Value) -> Result<()> {
        let items = body
            .as_array()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AuthError::invalid("Invalid data (body)"))?;

        let pending = self.store.with_conn(|conn| {
            let mut pending: Vec<PendingDelete> = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                if !item.is_object() {
                    return Err(AuthError::invalid("Invalid data (body)"));
                }
                let req = DeleteRequest::from_value(item);
                let p = self
                    .validate_delete(conn, owner, &req)
                    .map_err(|e| e.at_index(index))?;
                check_delete_siblings(&pending, &p).map_err(|e| e.at_index(index))?;
                pending.push(p);
            }
            Ok(pending)
        })?;

        let deleted = self.store.with_transaction(|conn| {
            let mut deleted = Vec::with_capacity(pending.len());
            for p in &pending {
                deleted.push(self.write_delete(conn, owner, p)?);
            }
            Ok(deleted)
        })?;

        for (p, (email, role, resource)) in pending.iter().zip(deleted) {
            let capabilities = match role {
                Some(Role::Consumer) => Some(p.capabilities.clone().unwrap_or_default()),
                _ => None,
            };
            log::info!(
                "DELETED_POLICY: {}",
                json!({
                    "provider": owner.email,
                    "accesser": email,
                    "role": role.map(Role::as_str),
                    "resource_id": resource,
                    "capabilities": capabilities,
                    "delegated": owner.delegated,
                    "performed_by": owner.performed_by,
                })
            );
        }

        Ok(())
    }

    fn validate_delete(
        &self,
        conn: &Connection,
        owner: &Owner,
        req: &DeleteRequest,
    ) -> Result<PendingDelete> {
        let id = req
            .id
            .as_ref()
            .and_then(parse_grant_id)
            .filter(|id| (1..=MAX_GRANT_ID).contains(id))
            .ok_or_else(|| AuthError::invalid("Invalid data (id)"))?;

        let invalid_id = || AuthError::unauthorized("Invalid id", None);

        let grant = grants::active_grant(conn, id, owner.user_id)?.ok_or_else(invalid_id)?;

        if owner.delegated && grant.item_type == ItemType::ProviderCaps {
            return Err(AuthError::unauthorized(
                "Delegate cannot delete delegate rules",
                None,
            ));
        }

        let existing = grants::active_capabilities(conn, id)?;

        let (Some(requested), false) = (req.capabilities.as_ref(), existing.is_empty()) else {
            return Ok(PendingDelete {
                id,
                capabilities: None,
            });
        };

        let cat_id = match grant.item_type {
            ItemType::ResourceGroup => grants::resource_group_cat_id(conn, grant.item_id)?,
            _ => None,
        }
        .ok_or_else(invalid_id)?;

        let server = cat_id.split('/').nth(2).unwrap_or_default();
        let server = self
            .table
            .server(server)
            .ok_or_else(|| AuthError::invalid("Invalid data (capabilities)"))?;

        let requested = parse_capabilities(Some(requested), server)?;
        let current = known_capabilities(server, id, &existing);

        if !requested.is_subset(current) {
            return Err(invalid_id());
        }

        let capabilities = if requested == current {
            None
        } else {
            Some(server.consumer_names(requested))
        };

        Ok(PendingDelete { id, capabilities })
    }

    /// Apply one delete; returns the grantee email, role and resource for
    /// the audit log.
    fn write_delete(
        &self,
        conn: &Connection,
        owner: &Owner,
        p: &PendingDelete,
    ) -> Result<(Option<String>, Option<Role>, Option<String>)> {
        let grant = grants::active_grant(conn, p.id, owner.user_id)?
            .ok_or_else(|| AuthError::unauthorized("Invalid id", None))?;
        let (email, role) = users::role_owner(conn, grant.role_id)?
            .map(|(e, r)| (Some(e), Some(r)))
            .unwrap_or((None, None));
        let cat_id = match grant.item_type {
            ItemType::ResourceGroup => grants::resource_group_cat_id(conn, grant.item_id)?,
            _ => None,
        };

        let Some(names) = &p.capabilities else {
            grants::delete_grant(conn, p.id)?;
            return Ok((email, role, cat_id));
        };

        grants::delete_capabilities(conn, p.id, names)?;

        let server = cat_id
            .as_deref()
            .and_then(|c| c.split('/').nth(2))
            .map(str::to_string);
        let remaining = stored_capabilities(
            conn,
            self.server_caps(server.as_deref().unwrap_or_default())?,
            p.id,
        )?;

        if remaining.is_empty() {
            grants::delete_grant(conn, p.id)?;
        } else {
            let pending = PendingGrant {
                grantee_email: email.clone().unwrap_or_default(),
                grantee_uid: 0,
                role: Role::Consumer,
                item_type: ItemType::ResourceGroup,
                server,
                cat_id: cat_id.clone(),
                capabilities: remaining,
            };
            let names = self
                .server_caps(pending.server.as_deref().unwrap_or_default())?
                .consumer_names(remaining);
            let (text, json) = self.resource_policy(owner, &pending, Role::Consumer, &names)?;
            grants::update_policy(conn, p.id, &text, &json)?;
        }

        Ok((email, role, cat_id))
    }

    // ── Delegation ───────────────────────────────────────────────────────────

    /// Providers that gave `caller_email` an active delegate grant.
    pub fn delegate_providers(&self, caller_email: &str) -> Result<Vec<DelegatingProvider>> {
        self.store.with_conn(|conn| {
            let not_allowed = || AuthError::NotAllowed("Not allowed".into());
            let uid = users::approved_user(conn, caller_email, Role::Delegate)?
                .ok_or_else(not_allowed)?;
            let role_id = users::role_id(conn, uid, Role::Delegate)?.ok_or_else(not_allowed)?;

            let providers = grants::delegating_providers(conn, role_id)?;
            if providers.is_empty() {
                return Err(AuthError::NotFound("Not approved by any providers".into()));
            }
            Ok(providers)
        })
    }
}

/// Active capabilities of grant `access_id` that the server still defines.
fn stored_capabilities(
    conn: &Connection,
    server: &ServerCapabilities,
    access_id: i64,
) -> Result<CapabilitySet> {
    let names = grants::active_capabilities(conn, access_id)?;
    Ok(known_capabilities(server, access_id, &names))
}

fn known_capabilities(server: &ServerCapabilities, access_id: i64, names: &[String]) -> CapabilitySet {
    let (set, unknown) = server.partition_consumer(names);
    if !unknown.is_empty() {
        log::warn!(
            "grant {access_id} holds capabilities missing from the capability table: {}",
            unknown.join(",")
        );
    }
    set
}

/// Consumer capabilities from a request: a non-empty array of known names,
/// no longer than the server's capability list.
fn parse_capabilities(value: Option<&Value>, server: &ServerCapabilities) -> Result<CapabilitySet> {
    let invalid = || AuthError::invalid("Invalid data (capabilities)");

    let list = value.and_then(Value::as_array).ok_or_else(invalid)?;
    if list.is_empty() || list.len() > server.consumer_len() {
        return Err(invalid());
    }

    let names: Vec<&str> = list
        .iter()
        .map(|v| v.as_str().ok_or_else(invalid))
        .collect::<Result<_>>()?;

    server.consumer_set(&names).map_err(|_| invalid())
}

fn parse_grant_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_create_siblings(pending: &[PendingGrant], p: &PendingGrant) -> Result<()> {
    let duplicate = pending.iter().any(|q| {
        q.role == p.role
            && q.grantee_email == p.grantee_email
            && match p.role {
                Role::Onboarder | Role::Delegate => true,
                Role::DataIngester => q.cat_id == p.cat_id,
                Role::Consumer => {
                    q.cat_id == p.cat_id && !q.capabilities.intersection(p.capabilities).is_empty()
                }
                Role::Provider | Role::Admin => false,
            }
    });

    if duplicate {
        return Err(AuthError::invalid("Invalid data (duplicate)"));
    }
    Ok(())
}

fn check_delete_siblings(pending: &[PendingDelete], p: &PendingDelete) -> Result<()> {
    let duplicate = pending.iter().filter(|q| q.id == p.id).any(|q| {
        match (&q.capabilities, &p.capabilities) {
            (Some(a), Some(b)) => a.iter().any(|c| b.contains(c)),
            _ => true,
        }
    });

    if duplicate {
        return Err(AuthError::invalid("Duplicate data"));
    }
    Ok(())
}
