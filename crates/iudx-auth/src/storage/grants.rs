//! Grant, capability and resource-group rows.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::error::{AuthError, Result};
use crate::grant::types::{
    DelegatingProvider, Grant, GrantItem, GrantListing, ItemType, UserName,
};
use crate::identity::Role;
use crate::time::now_secs;

// ── Resource groups ──────────────────────────────────────────────────────────

pub fn resource_group_id(conn: &Connection, cat_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM resource_groups WHERE cat_id = ?1",
            [cat_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Owner (provider user id) and row id of a resource group.
pub fn resource_group(conn: &Connection, cat_id: &str) -> Result<Option<(i64, i64)>> {
    Ok(conn
        .query_row(
            "SELECT id, provider_id FROM resource_groups WHERE cat_id = ?1",
            [cat_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

pub fn resource_group_cat_id(conn: &Connection, id: i64) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT cat_id FROM resource_groups WHERE id = ?1",
            [id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Row id of the resource group, inserting it when missing.
pub fn resolve_or_insert_resource_group(
    conn: &Connection,
    provider_id: i64,
    cat_id: &str,
) -> Result<i64> {
    let now = now_secs();
    conn.execute(
        "INSERT INTO resource_groups (provider_id, cat_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(cat_id) DO NOTHING",
        params![provider_id, cat_id, now],
    )?;

    resource_group_id(conn, cat_id)?
        .ok_or_else(|| AuthError::StorageError(format!("resource group {cat_id} vanished")))
}

// ── Grants ───────────────────────────────────────────────────────────────────

const GRANT_COLUMNS: &str = "id, provider_id, role_id, access_item_type, access_item_id,
     policy_text, policy_json, status, created_at, updated_at";

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<Grant> {
    let item_type: String = row.get(3)?;
    let policy_json: String = row.get(6)?;
    let status: String = row.get(7)?;

    Ok(Grant {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        role_id: row.get(2)?,
        item_type: item_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        item_id: row.get(4)?,
        policy_text: row.get(5)?,
        policy_json: serde_json::from_str(&policy_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        active: status == "active",
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// An active grant by id, only if `provider_id` owns it.
pub fn active_grant(conn: &Connection, id: i64, provider_id: i64) -> Result<Option<Grant>> {
    let sql = format!(
        "SELECT {GRANT_COLUMNS} FROM access
         WHERE id = ?1 AND provider_id = ?2 AND status = 'active'"
    );
    Ok(conn
        .query_row(&sql, params![id, provider_id], grant_from_row)
        .optional()?)
}

/// Active grant on (provider, grantee user, item, grantee role).
pub fn active_grant_for(
    conn: &Connection,
    provider_id: i64,
    grantee_user_id: i64,
    item_type: ItemType,
    item_id: i64,
    role: Role,
) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT a.id FROM access AS a JOIN roles ON roles.id = a.role_id
             WHERE a.provider_id = ?1 AND a.status = 'active'
               AND roles.user_id = ?2 AND a.access_item_type = ?3
               AND a.access_item_id = ?4 AND roles.role = ?5
             ORDER BY a.id LIMIT 1",
            params![
                provider_id,
                grantee_user_id,
                item_type.as_str(),
                item_id,
                role.as_str()
            ],
            |r| r.get(0),
        )
        .optional()?)
}

pub struct NewGrant<'a> {
    pub provider_id: i64,
    pub role_id: i64,
    pub policy_text: &'a str,
    pub policy_json: &'a Value,
    pub item_id: i64,
    pub item_type: ItemType,
}

pub fn insert_grant(conn: &Connection, grant: &NewGrant<'_>) -> Result<i64> {
    let now = now_secs();
    conn.execute(
        "INSERT INTO access (provider_id, role_id, policy_text, policy_json,
             access_item_id, access_item_type, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7)",
        params![
            grant.provider_id,
            grant.role_id,
            grant.policy_text,
            serde_json::to_string(grant.policy_json)?,
            grant.item_id,
            grant.item_type.as_str(),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_policy(
    conn: &Connection,
    id: i64,
    policy_text: &str,
    policy_json: &Value,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE access SET policy_text = ?1, policy_json = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'active'",
        params![
            policy_text,
            serde_json::to_string(policy_json)?,
            now_secs(),
            id
        ],
    )?)
}

/// Mark a grant and all its capabilities deleted.
pub fn delete_grant(conn: &Connection, id: i64) -> Result<usize> {
    let now = now_secs();
    let n = conn.execute(
        "UPDATE access SET status = 'deleted', updated_at = ?1
         WHERE id = ?2 AND status = 'active'",
        params![now, id],
    )?;
    conn.execute(
        "UPDATE capability SET status = 'deleted', updated_at = ?1
         WHERE access_id = ?2 AND status = 'active'",
        params![now, id],
    )?;
    Ok(n)
}

/// Compiled policies of the active grants a provider gave to any of
/// `role_ids` on one item.
pub fn policies_for(
    conn: &Connection,
    provider_id: i64,
    item_type: ItemType,
    item_id: i64,
    role_ids: &[i64],
) -> Result<Vec<Value>> {
    if role_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; role_ids.len()].join(", ");
    let sql = format!(
        "SELECT policy_json FROM access
         WHERE provider_id = ? AND access_item_id = ? AND access_item_type = ?
           AND status = 'active' AND role_id IN ({placeholders})
         ORDER BY id"
    );

    let mut args: Vec<rusqlite::types::Value> = vec![
        provider_id.into(),
        item_id.into(),
        item_type.as_str().to_string().into(),
    ];
    args.extend(role_ids.iter().map(|id| rusqlite::types::Value::from(*id)));

    let mut stmt = conn.prepare(&sql)?;
    let texts = stmt
        .query_map(params_from_iter(args.iter()), |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    texts
        .iter()
        .map(|t| serde_json::from_str(t).map_err(AuthError::from))
        .collect()
}

/// Role id of the delegate role when `provider_id` has an active
/// delegate grant for `delegate_user_id`.
pub fn delegate_grant_role(
    conn: &Connection,
    provider_id: i64,
    delegate_user_id: i64,
) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT a.role_id FROM access AS a JOIN roles ON roles.id = a.role_id
             WHERE a.provider_id = ?1 AND roles.user_id = ?2
               AND a.access_item_type = 'provider-caps' AND a.status = 'active'
             LIMIT 1",
            params![provider_id, delegate_user_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Providers with an active grant on the delegate role `role_id`.
pub fn delegating_providers(conn: &Connection, role_id: i64) -> Result<Vec<DelegatingProvider>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT users.email, users.title, users.first_name, users.last_name
         FROM access JOIN users ON access.provider_id = users.id
         WHERE access.role_id = ?1 AND access.status = 'active'
         ORDER BY users.email",
    )?;
    let rows = stmt
        .query_map([role_id], |r| {
            Ok(DelegatingProvider {
                email: r.get(0)?,
                title: r.get(1)?,
                first_name: r.get(2)?,
                last_name: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Every active grant of a provider.
pub fn list_grants(conn: &Connection, provider_id: i64) -> Result<Vec<GrantListing>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, users.email, roles.role, users.title, users.first_name, users.last_name,
                a.access_item_type, a.access_item_id, a.created_at, rg.cat_id
         FROM access AS a
         JOIN roles ON a.role_id = roles.id
         JOIN users ON roles.user_id = users.id
         LEFT JOIN resource_groups AS rg
           ON a.access_item_type = 'resourcegroup' AND rg.id = a.access_item_id
         WHERE a.provider_id = ?1 AND a.status = 'active'
         ORDER BY a.id",
    )?;

    let rows = stmt
        .query_map([provider_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                UserName {
                    title: r.get(3)?,
                    first_name: r.get(4)?,
                    last_name: r.get(5)?,
                },
                r.get::<_, String>(6)?,
                r.get::<_, i64>(8)?,
                r.get::<_, Option<String>>(9)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, email, role, user_name, item_type, created, cat_id) in rows {
        let role: Role = role.parse().map_err(AuthError::StorageError)?;
        let item_type: ItemType = item_type.parse().map_err(AuthError::StorageError)?;
        let caps = active_capabilities(conn, id)?;

        out.push(GrantListing {
            id,
            email,
            role,
            user_name,
            item_type,
            item: cat_id.map(|cat_id| GrantItem { cat_id }),
            created,
            capabilities: if caps.is_empty() { None } else { Some(caps) },
        });
    }
    Ok(out)
}

// ── Capabilities ─────────────────────────────────────────────────────────────

pub fn active_capabilities(conn: &Connection, access_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT capability FROM capability
         WHERE access_id = ?1 AND status = 'active' ORDER BY id",
    )?;
    let caps = stmt
        .query_map([access_id], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(caps)
}

pub fn insert_capability(conn: &Connection, access_id: i64, capability: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO capability (access_id, capability, status, created_at, updated_at)
         VALUES (?1, ?2, 'active', ?3, ?3)",
        params![access_id, capability, now_secs()],
    )?;
    Ok(())
}

/// Mark the named capabilities of a grant deleted.
pub fn delete_capabilities(conn: &Connection, access_id: i64, names: &[String]) -> Result<usize> {
    let now = now_secs();
    let mut n = 0;
    for name in names {
        n += conn.execute(
            "UPDATE capability SET status = 'deleted', updated_at = ?1
             WHERE access_id = ?2 AND capability = ?3 AND status = 'active'",
            params![now, access_id, name],
        )?;
    }
    Ok(n)
}
