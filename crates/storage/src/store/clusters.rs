#![forbid(unsafe_code)]

use super::filter::{ClusterScope, compile};
use super::*;
use cv_core::filter::FilterSpec;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

const CLUSTER_COLUMNS: &str = "c.cluster_key, c.label, c.centroid, c.representative_member_id, \
     c.count, c.created_at_ms, c.updated_at_ms";

pub(super) fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<ClusterRow> {
    Ok(ClusterRow {
        key: row.get(0)?,
        label: row.get(1)?,
        centroid: row.get(2)?,
        representative_member_id: row.get(3)?,
        count: row.get(4)?,
        created_at_ms: row.get(5)?,
        updated_at_ms: row.get(6)?,
    })
}

pub(super) fn cluster_row_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &str,
) -> Result<Option<ClusterRow>, StoreError> {
    let sql =
        format!("SELECT {CLUSTER_COLUMNS} FROM clusters c WHERE c.project=?1 AND c.cluster_key=?2");
    Ok(tx
        .query_row(&sql, params![project.as_str(), key], cluster_from_row)
        .optional()?)
}

/// Writes `row` back verbatim, creating it when absent.
pub(super) fn cluster_restore_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    row: &ClusterRow,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO clusters(project, cluster_key, label, centroid, representative_member_id, count, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(project, cluster_key) DO UPDATE SET \
           label=excluded.label, centroid=excluded.centroid, \
           representative_member_id=excluded.representative_member_id, count=excluded.count, \
           created_at_ms=excluded.created_at_ms, updated_at_ms=excluded.updated_at_ms",
        params![
            project.as_str(),
            row.key,
            row.label,
            row.centroid,
            row.representative_member_id,
            row.count,
            row.created_at_ms,
            row.updated_at_ms,
        ],
    )?;
    Ok(())
}

/// Creates the cluster row on first sight of `key`; existing rows are left untouched.
pub(super) fn ensure_cluster_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &ClusterKey,
    now_ms: i64,
) -> Result<bool, StoreError> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO clusters(project, cluster_key, count, created_at_ms, updated_at_ms) \
         VALUES (?1, ?2, 0, ?3, ?3)",
        params![project.as_str(), key.as_str(), now_ms],
    )?;
    Ok(inserted > 0)
}

pub(super) fn cluster_parent_ids_on(
    conn: &Connection,
    project: &ProjectId,
    key: &str,
) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT parent_id FROM parent_associations \
         WHERE project=?1 AND cluster_key=?2 ORDER BY parent_id ASC",
    )?;
    let rows = stmt.query_map(params![project.as_str(), key], |row| row.get::<_, i64>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

impl SqliteStore {
    pub fn cluster_upsert(
        &mut self,
        project: &ProjectId,
        request: ClusterUpsertRequest,
    ) -> Result<ClusterRow, StoreError> {
        let label = request
            .label
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty());

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_project_tx(&tx, project, now_ms)?;
        ensure_cluster_tx(&tx, project, &request.key, now_ms)?;
        tx.execute(
            "UPDATE clusters SET label=?3, updated_at_ms=?4 WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), request.key.as_str(), label, now_ms],
        )?;
        let row = cluster_row_tx(&tx, project, request.key.as_str())?.ok_or_else(|| {
            StoreError::ClusterNotFound {
                key: request.key.as_str().to_string(),
            }
        })?;
        tx.commit()?;
        Ok(row)
    }

    pub fn cluster_get(
        &self,
        project: &ProjectId,
        key: &ClusterKey,
    ) -> Result<Option<ClusterRow>, StoreError> {
        let sql =
            format!("SELECT {CLUSTER_COLUMNS} FROM clusters c WHERE c.project=?1 AND c.cluster_key=?2");
        Ok(self
            .conn
            .query_row(&sql, params![project.as_str(), key.as_str()], cluster_from_row)
            .optional()?)
    }

    /// Deletes an empty cluster. Clusters that still own members are refused with
    /// `ConstraintViolation`; their associations go with the row.
    pub fn cluster_delete(&mut self, project: &ProjectId, key: &ClusterKey) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        ensure_cluster_exists_tx(&tx, project, key)?;
        tx.execute(
            "DELETE FROM clusters WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), key.as_str()],
        )
        .map_err(map_constraint)?;
        tx.commit()?;
        Ok(())
    }

    pub fn cluster_parent_ids(
        &self,
        project: &ProjectId,
        key: &ClusterKey,
    ) -> Result<Vec<i64>, StoreError> {
        cluster_parent_ids_on(&self.conn, project, key.as_str())
    }

    /// Clusters with at least one associated parent matching `filter`; `FilterSpec::All` lists
    /// every cluster, including empty ones. Largest clusters first.
    pub fn clusters_query(
        &self,
        project: &ProjectId,
        filter: &FilterSpec,
    ) -> Result<Vec<ClusterRow>, StoreError> {
        let mut bound = vec![Value::Text(project.as_str().to_string())];
        let predicate = if filter.is_all() {
            "1=1".to_string()
        } else {
            let compiled = compile(filter, ClusterScope::Column("pa.cluster_key"), 2)?;
            bound.extend(compiled.params);
            format!(
                "EXISTS (SELECT 1 FROM parent_associations pa \
                 JOIN parents p ON p.project = pa.project AND p.parent_id = pa.parent_id \
                 WHERE pa.project = c.project AND pa.cluster_key = c.cluster_key AND {})",
                compiled.clause
            )
        };
        let sql = format!(
            "SELECT {CLUSTER_COLUMNS} FROM clusters c \
             WHERE c.project = ?1 AND {predicate} \
             ORDER BY c.count DESC, c.cluster_key ASC"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), cluster_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
