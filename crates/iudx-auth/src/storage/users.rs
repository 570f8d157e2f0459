//! Users and roles.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::Result;
use crate::grant::types::UserName;
use crate::identity::{Role, RoleStatus};
use crate::time::now_secs;

/// Insert a user, or return the id of the existing one.
pub fn add_user(
    conn: &Connection,
    email: &str,
    title: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<i64> {
    let email = email.to_ascii_lowercase();
    conn.execute(
        "INSERT INTO users (email, title, first_name, last_name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(email) DO NOTHING",
        params![email, title, first_name, last_name, now_secs()],
    )?;

    let id = conn.query_row("SELECT id FROM users WHERE email = ?1", [&email], |r| {
        r.get(0)
    })?;
    Ok(id)
}

pub fn user_id(conn: &Connection, email: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1",
            [email.to_ascii_lowercase()],
            |r| r.get(0),
        )
        .optional()?)
}

/// Give `user_id` a role, or change the status of the role it has.
pub fn set_role(conn: &Connection, user_id: i64, role: Role, status: RoleStatus) -> Result<i64> {
    let now = now_secs();
    conn.execute(
        "INSERT INTO roles (user_id, role, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(user_id, role) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
        params![user_id, role.as_str(), status.as_str(), now],
    )?;

    let id = conn.query_row(
        "SELECT id FROM roles WHERE user_id = ?1 AND role = ?2",
        params![user_id, role.as_str()],
        |r| r.get(0),
    )?;
    Ok(id)
}

/// User id of `email` if it holds `role` in approved state.
pub fn approved_user(conn: &Connection, email: &str, role: Role) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT users.id FROM users JOIN roles ON roles.user_id = users.id
             WHERE users.email = ?1 AND roles.role = ?2 AND roles.status = 'approved'",
            params![email.to_ascii_lowercase(), role.as_str()],
            |r| r.get(0),
        )
        .optional()?)
}

/// Role row id of a user's role, whatever its status.
pub fn role_id(conn: &Connection, user_id: i64, role: Role) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM roles WHERE user_id = ?1 AND role = ?2",
            params![user_id, role.as_str()],
            |r| r.get(0),
        )
        .optional()?)
}

/// Role row ids of the approved roles of `email` among `roles`.
pub fn approved_role_ids(conn: &Connection, email: &str, roles: &[Role]) -> Result<Vec<i64>> {
    if roles.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; roles.len()].join(", ");
    let sql = format!(
        "SELECT roles.id FROM roles JOIN users ON roles.user_id = users.id
         WHERE users.email = ? AND roles.status = 'approved' AND roles.role IN ({placeholders})
         ORDER BY roles.id"
    );

    let mut args: Vec<String> = vec![email.to_ascii_lowercase()];
    args.extend(roles.iter().map(|r| r.as_str().to_string()));

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(args.iter()), |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Name and roles (any status) of a user.
pub fn profile(conn: &Connection, email: &str) -> Result<Option<(UserName, Vec<Role>)>> {
    let name = conn
        .query_row(
            "SELECT id, title, first_name, last_name FROM users WHERE email = ?1",
            [email.to_ascii_lowercase()],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    UserName {
                        title: r.get(1)?,
                        first_name: r.get(2)?,
                        last_name: r.get(3)?,
                    },
                ))
            },
        )
        .optional()?;

    let Some((user_id, name)) = name else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT role FROM roles WHERE user_id = ?1 ORDER BY id")?;
    let roles = stmt
        .query_map([user_id], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?
        .into_iter()
        .filter_map(|r| r.parse::<Role>().ok())
        .collect();

    Ok(Some((name, roles)))
}

/// Users whose email belongs to `domain`, as `(id, email)`.
pub fn users_in_domain(conn: &Connection, domain: &str) -> Result<Vec<(i64, String)>> {
    let pattern = format!("%@{}", domain.to_ascii_lowercase());
    let mut stmt = conn.prepare("SELECT id, email FROM users WHERE email LIKE ?1 ORDER BY id")?;
    let rows = stmt
        .query_map([pattern], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(i64, String)>>>()?;
    Ok(rows)
}

/// Email and role behind a role row.
pub fn role_owner(conn: &Connection, role_id: i64) -> Result<Option<(String, Role)>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT users.email, roles.role FROM roles JOIN users ON users.id = roles.user_id
             WHERE roles.id = ?1",
            [role_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(email, role)| role.parse::<Role>().ok().map(|role| (email, role))))
}
