// src/core/rbac/mod.rs

//! Resolves `HasPermission(userId, resource, action)` by
//! joining user -> role -> role_permission -> permission, honoring
//! not-yet-expired grants. The administrative invariants (last admin
//! cannot be deleted/demoted/deactivated, a user cannot modify their own
//! role) are enforced by the user-management handlers, not here — this
//! engine only answers "does this user currently hold this permission".

use crate::core::DPlaneError;
use crate::core::store::Store;

/// Resolves whether `user_id` currently holds `resource:action`, via any
/// non-expired role grant.
pub async fn has_permission(store: &Store, user_id: i64, resource: &str, action: &str) -> Result<bool, DPlaneError> {
    let resource = resource.to_string();
    let action = action.to_string();
    let now = now_unix();
    store
        .with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM user_roles ur
                 JOIN role_permissions rp ON rp.role_id = ur.role_id
                 JOIN permissions p ON p.id = rp.permission_id
                 WHERE ur.user_id = ?1
                   AND p.resource = ?2
                   AND p.action = ?3
                   AND (ur.expires_at IS NULL OR ur.expires_at > ?4)",
                rusqlite::params![user_id, resource, action, now],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
        .await
}

pub async fn has_role(store: &Store, user_id: i64, role_name: &str) -> Result<bool, DPlaneError> {
    let role_name = role_name.to_string();
    let now = now_unix();
    store
        .with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id
                 WHERE ur.user_id = ?1 AND r.name = ?2
                   AND (ur.expires_at IS NULL OR ur.expires_at > ?3)",
                rusqlite::params![user_id, role_name, now],
                |r| r.get(0),
            )?;
            Ok(count > 0)
        })
        .await
}

/// Every permission the admin role is seeded with. `validate()`'s "exactly
/// one seeded admin role granted every permission" invariant is enforced at
/// seed time; see [`seed_admin_role`].
pub async fn is_last_admin(store: &Store, user_id: i64) -> Result<bool, DPlaneError> {
    if !has_role(store, user_id, "admin").await? {
        return Ok(false);
    }
    let now = now_unix();
    store
        .with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT ur.user_id)
                 FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id
                 JOIN users u ON u.id = ur.user_id
                 WHERE r.name = 'admin' AND u.active = 1
                   AND (ur.expires_at IS NULL OR ur.expires_at > ?1)",
                [now],
                |r| r.get(0),
            )?;
            Ok(count <= 1)
        })
        .await
}

/// Idempotently seeds the fixed set of resources/actions, an `admin` role
/// granted every one of them, and a `viewer` role granted only `*:read`.
/// Called once at startup after migrations.
pub async fn seed_default_rbac(store: &Store) -> Result<(), DPlaneError> {
    const RESOURCES: &[&str] = &[
        "zfs_pool", "zfs_dataset", "share", "container", "network", "ldap", "cluster", "upload", "user", "role",
    ];
    const ACTIONS: &[&str] = &["read", "write", "delete", "admin"];

    store
        .with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for resource in RESOURCES {
                for action in ACTIONS {
                    tx.execute(
                        "INSERT OR IGNORE INTO permissions (resource, action) VALUES (?1, ?2)",
                        [resource, action],
                    )?;
                }
            }

            tx.execute(
                "INSERT OR IGNORE INTO roles (name, display_name, is_system) VALUES ('admin', 'Administrator', 1)",
                [],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO roles (name, display_name, is_system) VALUES ('viewer', 'Read-only', 1)",
                [],
            )?;

            let admin_role_id: i64 = tx.query_row("SELECT id FROM roles WHERE name = 'admin'", [], |r| r.get(0))?;
            let viewer_role_id: i64 = tx.query_row("SELECT id FROM roles WHERE name = 'viewer'", [], |r| r.get(0))?;

            let mut stmt = tx.prepare("SELECT id, action FROM permissions")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let permission_id: i64 = row.get(0)?;
                let action: String = row.get(1)?;
                tx.execute(
                    "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
                    [admin_role_id, permission_id],
                )?;
                if action == "read" {
                    tx.execute(
                        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
                        [viewer_role_id, permission_id],
                    )?;
                }
            }
            drop(rows);
            drop(stmt);
            tx.commit()?;
            Ok(())
        })
        .await
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> Store {
        let store = Store::open(":memory:").await.unwrap();
        seed_default_rbac(&store).await.unwrap();
        store
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = seeded_store().await;
        seed_default_rbac(&store).await.unwrap();
        let count: i64 = store
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM roles WHERE name = 'admin'", [], |r| r.get(0)).map_err(Into::into))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn admin_role_holds_every_permission() {
        let store = seeded_store().await;
        store
            .with_conn(|conn| {
                conn.execute("INSERT INTO users (username, password_hash, created_at) VALUES ('root', 'x', 0)", [])?;
                conn.execute(
                    "INSERT INTO user_roles (user_id, role_id) SELECT 1, id FROM roles WHERE name = 'admin'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(has_permission(&store, 1, "zfs_pool", "delete").await.unwrap());
        assert!(has_permission(&store, 1, "user", "admin").await.unwrap());
    }

    #[tokio::test]
    async fn viewer_role_cannot_write() {
        let store = seeded_store().await;
        store
            .with_conn(|conn| {
                conn.execute("INSERT INTO users (username, password_hash, created_at) VALUES ('guest', 'x', 0)", [])?;
                conn.execute(
                    "INSERT INTO user_roles (user_id, role_id) SELECT 1, id FROM roles WHERE name = 'viewer'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(has_permission(&store, 1, "share", "read").await.unwrap());
        assert!(!has_permission(&store, 1, "share", "write").await.unwrap());
    }

    #[tokio::test]
    async fn expired_grant_does_not_count() {
        let store = seeded_store().await;
        store
            .with_conn(|conn| {
                conn.execute("INSERT INTO users (username, password_hash, created_at) VALUES ('temp', 'x', 0)", [])?;
                conn.execute(
                    "INSERT INTO user_roles (user_id, role_id, expires_at) SELECT 1, id, 1 FROM roles WHERE name = 'admin'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(!has_permission(&store, 1, "zfs_pool", "delete").await.unwrap());
    }

    #[tokio::test]
    async fn sole_admin_is_reported_as_last() {
        let store = seeded_store().await;
        store
            .with_conn(|conn| {
                conn.execute("INSERT INTO users (username, password_hash, created_at) VALUES ('root', 'x', 0)", [])?;
                conn.execute(
                    "INSERT INTO user_roles (user_id, role_id) SELECT 1, id FROM roles WHERE name = 'admin'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(is_last_admin(&store, 1).await.unwrap());
    }
}
