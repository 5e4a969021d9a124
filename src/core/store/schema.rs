// src/core/store/schema.rs

//! Forward-only schema migrations for the embedded store.

use crate::core::DPlaneError;
use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    // v1: users, roles, permissions, sessions, audit, cluster, network.
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

    CREATE TABLE IF NOT EXISTS users (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        username        TEXT NOT NULL UNIQUE,
        password_hash   TEXT NOT NULL,
        email           TEXT,
        created_at      INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS roles (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL UNIQUE,
        display_name    TEXT NOT NULL,
        is_system       INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS permissions (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        resource        TEXT NOT NULL,
        action          TEXT NOT NULL,
        UNIQUE(resource, action)
    );

    CREATE TABLE IF NOT EXISTS role_permissions (
        role_id         INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id   INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    );

    CREATE TABLE IF NOT EXISTS user_roles (
        user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id         INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        expires_at      INTEGER,
        PRIMARY KEY (user_id, role_id)
    );

    CREATE TABLE IF NOT EXISTS sessions (
        token           TEXT PRIMARY KEY,
        user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        csrf_token      TEXT NOT NULL,
        created_at      INTEGER NOT NULL,
        expires_at      INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS audit_log (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        ts              INTEGER NOT NULL,
        actor           TEXT NOT NULL,
        action          TEXT NOT NULL,
        resource        TEXT NOT NULL,
        details         TEXT NOT NULL,
        source_addr     TEXT NOT NULL,
        success         INTEGER NOT NULL,
        prev_hash       BLOB NOT NULL,
        row_hash        BLOB NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cluster_nodes (
        id              TEXT PRIMARY KEY,
        address         TEXT NOT NULL,
        role            TEXT NOT NULL,
        state           TEXT NOT NULL,
        last_seen       INTEGER NOT NULL,
        missed_beats    INTEGER NOT NULL DEFAULT 0,
        version         TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS net_interfaces (
        name            TEXT PRIMARY KEY,
        kind            TEXT NOT NULL,
        cidr            TEXT,
        gateway         TEXT
    );

    CREATE TABLE IF NOT EXISTS net_bonds (
        name            TEXT PRIMARY KEY,
        slaves          TEXT NOT NULL,
        mode            TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS net_vlans (
        name            TEXT PRIMARY KEY,
        parent          TEXT NOT NULL,
        vlan_id         INTEGER NOT NULL
    );
    "#,
    // v2: users gain an active flag, enforced by the user-management
    // handlers' last-admin invariants rather than the RBAC engine itself.
    r#"
    ALTER TABLE users ADD COLUMN active INTEGER NOT NULL DEFAULT 1;
    "#,
];

/// Applies every migration past the store's current `schema_version`.
pub fn migrate(conn: &Connection) -> Result<(), DPlaneError> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .unwrap_or(0);

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);

        let row_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(
            row_count,
            MIGRATIONS.len() as i64,
            "re-running migrate must not re-insert already-applied versions"
        );
    }

    #[test]
    fn users_active_column_defaults_to_one() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES ('admin', 'x', 0)",
            [],
        )
        .unwrap();
        let active: i64 = conn
            .query_row("SELECT active FROM users WHERE username = 'admin'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(active, 1);
    }
}
