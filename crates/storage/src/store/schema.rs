#![forbid(unsafe_code)]

use super::{StoreError, now_ms};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;

pub(super) const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: [&str; 7] = [
    "store_state",
    "projects",
    "parents",
    "clusters",
    "members",
    "parent_associations",
    "merge_snapshots",
];

/// Refuses to open a database written by an incompatible schema instead of migrating it in place.
pub(super) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = REQUIRED_TABLES.into_iter().collect();

    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

pub(super) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let now_ms = now_ms();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
          project TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS parents (
          project TEXT NOT NULL,
          parent_id INTEGER NOT NULL,
          path TEXT NOT NULL,
          taken_at_ms INTEGER,
          media_kind TEXT NOT NULL CHECK(media_kind IN ('image', 'video')),
          duration_ms INTEGER,
          width INTEGER,
          height INTEGER,
          PRIMARY KEY(project, parent_id),
          FOREIGN KEY(project) REFERENCES projects(project) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_parents_project_taken
          ON parents(project, taken_at_ms, parent_id);
        CREATE INDEX IF NOT EXISTS idx_parents_project_path
          ON parents(project, path);

        CREATE TABLE IF NOT EXISTS clusters (
          project TEXT NOT NULL,
          cluster_key TEXT NOT NULL,
          label TEXT,
          centroid BLOB,
          representative_member_id INTEGER,
          count INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY(project, cluster_key),
          FOREIGN KEY(project) REFERENCES projects(project) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS members (
          member_id INTEGER PRIMARY KEY AUTOINCREMENT,
          project TEXT NOT NULL,
          parent_id INTEGER NOT NULL,
          cluster_key TEXT NOT NULL,
          feature BLOB NOT NULL,
          confidence REAL NOT NULL,
          bbox_x REAL NOT NULL,
          bbox_y REAL NOT NULL,
          bbox_w REAL NOT NULL,
          bbox_h REAL NOT NULL,
          is_representative INTEGER NOT NULL DEFAULT 0,
          FOREIGN KEY(project, parent_id)
            REFERENCES parents(project, parent_id)
            ON DELETE CASCADE,
          FOREIGN KEY(project, cluster_key)
            REFERENCES clusters(project, cluster_key)
            ON DELETE RESTRICT
        );

        CREATE INDEX IF NOT EXISTS idx_members_project_cluster
          ON members(project, cluster_key, member_id);

        CREATE TABLE IF NOT EXISTS parent_associations (
          project TEXT NOT NULL,
          cluster_key TEXT NOT NULL,
          parent_id INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(project, cluster_key, parent_id),
          FOREIGN KEY(project, cluster_key)
            REFERENCES clusters(project, cluster_key)
            ON DELETE CASCADE,
          FOREIGN KEY(project, parent_id)
            REFERENCES parents(project, parent_id)
            ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_parent_associations_parent
          ON parent_associations(project, parent_id);

        CREATE TABLE IF NOT EXISTS merge_snapshots (
          snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
          project TEXT NOT NULL,
          target_key TEXT NOT NULL,
          source_keys_json TEXT NOT NULL,
          payload_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          consumed_at_ms INTEGER,
          FOREIGN KEY(project) REFERENCES projects(project) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_merge_snapshots_project
          ON merge_snapshots(project, snapshot_id);
        "#,
    )?;

    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at_ms=excluded.updated_at_ms",
        params![SCHEMA_VERSION, now_ms],
    )?;

    Ok(())
}
