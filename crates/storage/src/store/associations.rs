#![forbid(unsafe_code)]

use super::filter::{ClusterScope, compile};
use super::*;
use cv_core::filter::FilterSpec;
use rusqlite::types::Value;
use rusqlite::{Row, params, params_from_iter};

fn association_from_row(row: &Row<'_>) -> rusqlite::Result<ParentAssociationRow> {
    Ok(ParentAssociationRow {
        cluster_key: row.get(0)?,
        parent_id: row.get(1)?,
        created_at_ms: row.get(2)?,
    })
}

pub(super) fn association_rows_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &str,
) -> Result<Vec<ParentAssociationRow>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT cluster_key, parent_id, created_at_ms FROM parent_associations \
         WHERE project=?1 AND cluster_key=?2 ORDER BY parent_id ASC",
    )?;
    let rows = stmt.query_map(params![project.as_str(), key], association_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

impl SqliteStore {
    /// Links `parent_id` to `key`. A parent already linked to the cluster is reported as
    /// `AlreadyPresent`; the cluster's cached count is refreshed either way.
    pub fn parent_association_insert(
        &mut self,
        project: &ProjectId,
        key: &ClusterKey,
        parent_id: i64,
    ) -> Result<AssociationWrite, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_cluster_exists_tx(&tx, project, key)?;
        let write = match tx.execute(
            "INSERT INTO parent_associations(project, cluster_key, parent_id, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4)",
            params![project.as_str(), key.as_str(), parent_id, now_ms],
        ) {
            Ok(_) => AssociationWrite::Inserted,
            Err(err) if is_duplicate_key(&err) => AssociationWrite::AlreadyPresent,
            Err(err) => return Err(map_constraint(err)),
        };
        refresh_cluster_count_tx(&tx, project, key.as_str(), now_ms)?;
        tx.commit()?;
        Ok(write)
    }

    /// Returns whether a row was removed.
    pub fn parent_association_delete(
        &mut self,
        project: &ProjectId,
        key: &ClusterKey,
        parent_id: i64,
    ) -> Result<bool, StoreError> {
        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_cluster_exists_tx(&tx, project, key)?;
        let deleted = tx.execute(
            "DELETE FROM parent_associations WHERE project=?1 AND cluster_key=?2 AND parent_id=?3",
            params![project.as_str(), key.as_str(), parent_id],
        )?;
        refresh_cluster_count_tx(&tx, project, key.as_str(), now_ms)?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub fn parent_associations_query(
        &self,
        project: &ProjectId,
        filter: &FilterSpec,
    ) -> Result<Vec<ParentAssociationRow>, StoreError> {
        let compiled = compile(filter, ClusterScope::Column("pa.cluster_key"), 2)?;
        let sql = format!(
            "SELECT pa.cluster_key, pa.parent_id, pa.created_at_ms FROM parent_associations pa \
             JOIN parents p ON p.project = pa.project AND p.parent_id = pa.parent_id \
             WHERE pa.project = ?1 AND {} \
             ORDER BY pa.cluster_key ASC, pa.parent_id ASC",
            compiled.clause
        );

        let mut bound = vec![Value::Text(project.as_str().to_string())];
        bound.extend(compiled.params);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), association_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
