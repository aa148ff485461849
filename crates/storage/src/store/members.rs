#![forbid(unsafe_code)]

use super::clusters::ensure_cluster_tx;
use super::filter::{ClusterScope, compile};
use super::*;
use cv_core::filter::FilterSpec;
use cv_core::model::Geometry;
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

const MEMBER_COLUMNS: &str = "m.member_id, m.parent_id, m.cluster_key, m.feature, m.confidence, \
     m.bbox_x, m.bbox_y, m.bbox_w, m.bbox_h, m.is_representative";

pub(super) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        member_id: row.get(0)?,
        parent_id: row.get(1)?,
        cluster_key: row.get(2)?,
        feature: row.get(3)?,
        confidence: row.get(4)?,
        geometry: Geometry {
            x: row.get(5)?,
            y: row.get(6)?,
            width: row.get(7)?,
            height: row.get(8)?,
        },
        is_representative: row.get::<_, i64>(9)? != 0,
    })
}

/// `(member_id, cluster_key)` for every member currently in `key`, in id order.
pub(super) fn member_keys_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &str,
) -> Result<Vec<(i64, String, bool)>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT member_id, cluster_key, is_representative FROM members \
         WHERE project=?1 AND cluster_key=?2 ORDER BY member_id ASC",
    )?;
    let rows = stmt.query_map(params![project.as_str(), key], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)? != 0,
        ))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(super) fn member_features_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    key: &str,
) -> Result<Vec<Vec<u8>>, StoreError> {
    let mut stmt = tx.prepare(
        "SELECT feature FROM members WHERE project=?1 AND cluster_key=?2 ORDER BY member_id ASC",
    )?;
    let rows = stmt.query_map(params![project.as_str(), key], |row| row.get::<_, Vec<u8>>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

impl SqliteStore {
    pub fn member_insert(
        &mut self,
        project: &ProjectId,
        request: MemberInsertRequest,
    ) -> Result<MemberRow, StoreError> {
        if !request.confidence.is_finite() {
            return Err(StoreError::InvalidInput("member.confidence must be finite"));
        }

        let now_ms = now_ms();
        let tx = self.conn.transaction()?;
        ensure_project_tx(&tx, project, now_ms)?;
        ensure_cluster_tx(&tx, project, &request.cluster_key, now_ms)?;
        tx.execute(
            "INSERT INTO members(project, parent_id, cluster_key, feature, confidence, bbox_x, bbox_y, bbox_w, bbox_h, is_representative) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                project.as_str(),
                request.parent_id,
                request.cluster_key.as_str(),
                request.feature,
                request.confidence,
                request.geometry.x,
                request.geometry.y,
                request.geometry.width,
                request.geometry.height,
                i64::from(request.is_representative),
            ],
        )
        .map_err(map_constraint)?;
        let member_id = tx.last_insert_rowid();
        if request.is_representative {
            tx.execute(
                "UPDATE clusters SET representative_member_id=?3 \
                 WHERE project=?1 AND cluster_key=?2 AND representative_member_id IS NULL",
                params![project.as_str(), request.cluster_key.as_str(), member_id],
            )?;
        }
        tx.commit()?;

        Ok(MemberRow {
            member_id,
            parent_id: request.parent_id,
            cluster_key: request.cluster_key.into_string(),
            feature: request.feature,
            confidence: request.confidence,
            geometry: request.geometry,
            is_representative: request.is_representative,
        })
    }

    pub fn member_get(
        &self,
        project: &ProjectId,
        member_id: i64,
    ) -> Result<Option<MemberRow>, StoreError> {
        let sql =
            format!("SELECT {MEMBER_COLUMNS} FROM members m WHERE m.project=?1 AND m.member_id=?2");
        Ok(self
            .conn
            .query_row(&sql, params![project.as_str(), member_id], member_from_row)
            .optional()?)
    }

    /// Reassigns one member. The destination cluster must already exist.
    pub fn member_set_cluster(
        &mut self,
        project: &ProjectId,
        member_id: i64,
        key: &ClusterKey,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        ensure_cluster_exists_tx(&tx, project, key)?;
        let updated = tx.execute(
            "UPDATE members SET cluster_key=?3 WHERE project=?1 AND member_id=?2",
            params![project.as_str(), member_id, key.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::InvalidInput("member not found"));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn members_query(
        &self,
        project: &ProjectId,
        filter: &FilterSpec,
    ) -> Result<Vec<MemberRow>, StoreError> {
        let compiled = compile(filter, ClusterScope::Column("m.cluster_key"), 2)?;
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM members m \
             JOIN parents p ON p.project = m.project AND p.parent_id = m.parent_id \
             WHERE m.project = ?1 AND {} \
             ORDER BY m.member_id ASC",
            compiled.clause
        );

        let mut bound = vec![Value::Text(project.as_str().to_string())];
        bound.extend(compiled.params);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), member_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
