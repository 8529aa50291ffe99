//! Directory repository over `users` and `role_capabilities`.

use hub_core::{DisplayIdentity, Identity, UserId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Directory repository; stateless, every method takes `&Connection`.
pub struct DirectoryRepo;

impl DirectoryRepo {
    /// Insert or replace a user.
    pub fn upsert_user(
        conn: &Connection,
        user_id: &UserId,
        display: &DisplayIdentity,
        active: bool,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO users (id, email, first_name, last_name, role, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 email = excluded.email,
                 first_name = excluded.first_name,
                 last_name = excluded.last_name,
                 role = excluded.role,
                 is_active = excluded.is_active",
            params![
                user_id.as_str(),
                display.email,
                display.first_name,
                display.last_name,
                display.role_name,
                active,
            ],
        )?;
        Ok(())
    }

    /// Flip a user's active flag. Returns whether the user exists.
    pub fn set_active(conn: &Connection, user_id: &UserId, active: bool) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, user_id.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Look up a user's identity, active or not.
    pub fn get_identity(conn: &Connection, user_id: &UserId) -> Result<Option<Identity>> {
        let identity = conn
            .query_row(
                "SELECT email, first_name, last_name, role FROM users WHERE id = ?1",
                params![user_id.as_str()],
                |row| {
                    Ok(DisplayIdentity {
                        email: row.get(0)?,
                        first_name: row.get(1)?,
                        last_name: row.get(2)?,
                        role_name: row.get(3)?,
                    })
                },
            )
            .optional()?
            .map(|display| Identity {
                user_id: user_id.clone(),
                display,
            });
        Ok(identity)
    }

    /// Ids of active users in `role`, sorted.
    pub fn active_users_by_role(conn: &Connection, role: &str) -> Result<Vec<UserId>> {
        let mut stmt =
            conn.prepare("SELECT id FROM users WHERE role = ?1 AND is_active = 1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![role], |row| row.get::<_, String>(0))?
            .map(|id| id.map(UserId::from_string))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Grant `capability` to every member of `role`. Idempotent.
    pub fn grant(conn: &Connection, role: &str, capability: &str) -> Result<()> {
        let _ = conn.execute(
            "INSERT OR IGNORE INTO role_capabilities (role, capability) VALUES (?1, ?2)",
            params![role, capability],
        )?;
        Ok(())
    }

    /// Revoke `capability` from `role`. Returns whether a grant existed.
    pub fn revoke(conn: &Connection, role: &str, capability: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM role_capabilities WHERE role = ?1 AND capability = ?2",
            params![role, capability],
        )?;
        Ok(changed > 0)
    }

    /// Whether an active `user_id` holds `capability` through their role.
    pub fn has_capability(conn: &Connection, user_id: &UserId, capability: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users u
                 JOIN role_capabilities rc ON rc.role = u.role
                 WHERE u.id = ?1 AND u.is_active = 1 AND rc.capability = ?2",
                params![user_id.as_str(), capability],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
