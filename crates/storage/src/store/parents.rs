#![forbid(unsafe_code)]

use super::filter::{ClusterScope, compile};
use super::*;
use cv_core::filter::FilterSpec;
use cv_core::model::MediaKind;
use rusqlite::types::{Type, Value};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

const PARENT_COLUMNS: &str =
    "p.parent_id, p.path, p.taken_at_ms, p.media_kind, p.duration_ms, p.width, p.height";

pub(super) fn parent_from_row(row: &Row<'_>) -> rusqlite::Result<ParentRow> {
    let media_kind: String = row.get(3)?;
    let media_kind = MediaKind::parse(&media_kind)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(3, "media_kind".to_string(), Type::Text))?;
    Ok(ParentRow {
        parent_id: row.get(0)?,
        path: row.get(1)?,
        taken_at_ms: row.get(2)?,
        media_kind,
        duration_ms: row.get(4)?,
        width: row.get(5)?,
        height: row.get(6)?,
    })
}

impl SqliteStore {
    pub fn parent_upsert(
        &mut self,
        project: &ProjectId,
        request: ParentUpsertRequest,
    ) -> Result<ParentRow, StoreError> {
        if request.path.trim().is_empty() {
            return Err(StoreError::InvalidInput("parent.path must not be empty"));
        }
        if request.media_kind == MediaKind::Image && request.duration_ms.is_some() {
            return Err(StoreError::InvalidInput(
                "parent.duration_ms is only valid for video",
            ));
        }

        let tx = self.conn.transaction()?;
        ensure_project_tx(&tx, project, now_ms())?;
        tx.execute(
            "INSERT INTO parents(project, parent_id, path, taken_at_ms, media_kind, duration_ms, width, height) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(project, parent_id) DO UPDATE SET \
               path=excluded.path, taken_at_ms=excluded.taken_at_ms, media_kind=excluded.media_kind, \
               duration_ms=excluded.duration_ms, width=excluded.width, height=excluded.height",
            params![
                project.as_str(),
                request.parent_id,
                request.path,
                request.taken_at_ms,
                request.media_kind.as_str(),
                request.duration_ms,
                request.width,
                request.height,
            ],
        )?;
        tx.commit()?;

        Ok(ParentRow {
            parent_id: request.parent_id,
            path: request.path,
            taken_at_ms: request.taken_at_ms,
            media_kind: request.media_kind,
            duration_ms: request.duration_ms,
            width: request.width,
            height: request.height,
        })
    }

    pub fn parent_get(
        &self,
        project: &ProjectId,
        parent_id: i64,
    ) -> Result<Option<ParentRow>, StoreError> {
        let sql = format!("SELECT {PARENT_COLUMNS} FROM parents p WHERE p.project=?1 AND p.parent_id=?2");
        Ok(self
            .conn
            .query_row(&sql, params![project.as_str(), parent_id], parent_from_row)
            .optional()?)
    }

    /// Parent records matching `filter`, oldest capture first; undated records sort last.
    pub fn parents_query(
        &self,
        project: &ProjectId,
        filter: &FilterSpec,
    ) -> Result<Vec<ParentRow>, StoreError> {
        let compiled = compile(filter, ClusterScope::ViaAssociation, 2)?;
        let sql = format!(
            "SELECT {PARENT_COLUMNS} FROM parents p \
             WHERE p.project = ?1 AND {} \
             ORDER BY p.taken_at_ms IS NULL, p.taken_at_ms ASC, p.parent_id ASC",
            compiled.clause
        );

        let mut bound = vec![Value::Text(project.as_str().to_string())];
        bound.extend(compiled.params);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), parent_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
