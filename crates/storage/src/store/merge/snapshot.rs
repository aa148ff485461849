#![forbid(unsafe_code)]

use super::super::*;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// Everything a merge overwrites, captured before the first write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeSnapshotPayload {
    pub target: ClusterRow,
    pub target_parent_ids: Vec<i64>,
    pub sources: Vec<ClusterRow>,
    pub members: Vec<MemberKeySnapshot>,
    pub associations: Vec<ParentAssociationRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberKeySnapshot {
    pub member_id: i64,
    pub cluster_key: String,
    #[serde(default)]
    pub is_representative: bool,
}

pub(in crate::store) struct StoredSnapshot {
    pub(in crate::store) row: MergeSnapshotRow,
    pub(in crate::store) payload: MergeSnapshotPayload,
}

struct RawSnapshot {
    snapshot_id: i64,
    target: String,
    source_keys_json: String,
    payload_json: String,
    created_at_ms: i64,
    consumed_at_ms: Option<i64>,
}

impl RawSnapshot {
    fn decode_row(&self) -> Result<MergeSnapshotRow, StoreError> {
        Ok(MergeSnapshotRow {
            snapshot_id: self.snapshot_id,
            target: self.target.clone(),
            sources: serde_json::from_str(&self.source_keys_json)?,
            created_at_ms: self.created_at_ms,
            consumed_at_ms: self.consumed_at_ms,
        })
    }
}

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSnapshot> {
    Ok(RawSnapshot {
        snapshot_id: row.get(0)?,
        target: row.get(1)?,
        source_keys_json: row.get(2)?,
        payload_json: row.get(3)?,
        created_at_ms: row.get(4)?,
        consumed_at_ms: row.get(5)?,
    })
}

pub(in crate::store) fn insert_snapshot_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    payload: &MergeSnapshotPayload,
    now_ms: i64,
) -> Result<i64, StoreError> {
    let source_keys: Vec<&str> = payload.sources.iter().map(|row| row.key.as_str()).collect();
    let source_keys_json = serde_json::to_string(&source_keys)?;
    let payload_json = serde_json::to_string(payload)?;
    tx.execute(
        "INSERT INTO merge_snapshots(project, target_key, source_keys_json, payload_json, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            project.as_str(),
            payload.target.key,
            source_keys_json,
            payload_json,
            now_ms
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

pub(in crate::store) fn snapshot_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    snapshot_id: i64,
) -> Result<Option<StoredSnapshot>, StoreError> {
    let raw = tx
        .query_row(
            "SELECT snapshot_id, target_key, source_keys_json, payload_json, created_at_ms, consumed_at_ms \
             FROM merge_snapshots WHERE project=?1 AND snapshot_id=?2",
            params![project.as_str(), snapshot_id],
            raw_from_row,
        )
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(StoredSnapshot {
        row: raw.decode_row()?,
        payload: serde_json::from_str(&raw.payload_json)?,
    }))
}

pub(in crate::store) fn latest_unconsumed_snapshot_id_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
) -> Result<Option<i64>, StoreError> {
    Ok(tx
        .query_row(
            "SELECT snapshot_id FROM merge_snapshots \
             WHERE project=?1 AND consumed_at_ms IS NULL \
             ORDER BY snapshot_id DESC LIMIT 1",
            params![project.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?)
}

pub(in crate::store) fn mark_consumed_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    snapshot_id: i64,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE merge_snapshots SET consumed_at_ms=?3 WHERE project=?1 AND snapshot_id=?2",
        params![project.as_str(), snapshot_id, now_ms],
    )?;
    Ok(())
}

impl SqliteStore {
    /// Newest first.
    pub fn merge_snapshots_list(
        &self,
        project: &ProjectId,
        limit: usize,
    ) -> Result<Vec<MergeSnapshotRow>, StoreError> {
        let limit = to_sqlite_i64(limit)?;
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_id, target_key, source_keys_json, payload_json, created_at_ms, consumed_at_ms \
             FROM merge_snapshots WHERE project=?1 \
             ORDER BY snapshot_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project.as_str(), limit], raw_from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.decode_row()?);
        }
        Ok(out)
    }

    pub fn merge_snapshot_get(
        &self,
        project: &ProjectId,
        snapshot_id: i64,
    ) -> Result<Option<(MergeSnapshotRow, MergeSnapshotPayload)>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "SELECT snapshot_id, target_key, source_keys_json, payload_json, created_at_ms, consumed_at_ms \
                 FROM merge_snapshots WHERE project=?1 AND snapshot_id=?2",
                params![project.as_str(), snapshot_id],
                raw_from_row,
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some((
                raw.decode_row()?,
                serde_json::from_str(&raw.payload_json)?,
            ))),
            None => Ok(None),
        }
    }
}
