#![forbid(unsafe_code)]

use super::super::clusters::cluster_restore_tx;
use super::super::*;
use super::begin_immediate;
use super::snapshot::{
    StoredSnapshot, latest_unconsumed_snapshot_id_tx, mark_consumed_tx, snapshot_tx,
};
use rusqlite::params;
use std::collections::BTreeSet;

impl SqliteStore {
    /// Restores the state captured by `snapshot_id` and consumes the snapshot. An undo whose
    /// target has since disappeared, or whose sources have been re-created, is refused with
    /// `SnapshotNotFound` and leaves everything untouched.
    pub fn cluster_merge_undo(
        &mut self,
        project: &ProjectId,
        snapshot_id: i64,
    ) -> Result<ClusterUndoResult, StoreError> {
        let now_ms = now_ms();
        let tx = begin_immediate(&mut self.conn)?;
        let result = undo_tx(&tx, project, snapshot_id, now_ms).map_err(StoreError::into_aborted)?;
        tx.commit()
            .map_err(|err| StoreError::from(err).into_aborted())?;
        log_undo(project, &result);
        Ok(result)
    }

    /// Undoes the most recent merge that has not been undone yet.
    pub fn cluster_merge_undo_latest(
        &mut self,
        project: &ProjectId,
    ) -> Result<ClusterUndoResult, StoreError> {
        let now_ms = now_ms();
        let tx = begin_immediate(&mut self.conn)?;
        let snapshot_id = latest_unconsumed_snapshot_id_tx(&tx, project)
            .map_err(StoreError::into_aborted)?
            .ok_or(StoreError::SnapshotNotFound { snapshot_id: None })?;
        let result = undo_tx(&tx, project, snapshot_id, now_ms).map_err(StoreError::into_aborted)?;
        tx.commit()
            .map_err(|err| StoreError::from(err).into_aborted())?;
        log_undo(project, &result);
        Ok(result)
    }
}

fn log_undo(project: &ProjectId, result: &ClusterUndoResult) {
    tracing::info!(
        project = project.as_str(),
        snapshot_id = result.snapshot_id,
        target = result.target.as_str(),
        restored_clusters = ?result.restored_clusters,
        restored_members = result.restored_members,
        restored_associations = result.restored_associations,
        "merge undone"
    );
}

fn undo_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    snapshot_id: i64,
    now_ms: i64,
) -> Result<ClusterUndoResult, StoreError> {
    let not_found = StoreError::SnapshotNotFound {
        snapshot_id: Some(snapshot_id),
    };
    let Some(StoredSnapshot { row, payload }) = snapshot_tx(tx, project, snapshot_id)? else {
        return Err(not_found);
    };
    if row.consumed_at_ms.is_some() {
        tracing::warn!(snapshot_id, "undo refused: snapshot already consumed");
        return Err(not_found);
    }

    let target = payload.target.key.as_str();
    if !cluster_exists_tx(tx, project, target)? {
        tracing::warn!(snapshot_id, target, "undo refused: target cluster no longer exists");
        return Err(not_found);
    }
    for source in &payload.sources {
        if cluster_exists_tx(tx, project, &source.key)? {
            tracing::warn!(
                snapshot_id,
                source = source.key.as_str(),
                "undo refused: source cluster was re-created"
            );
            return Err(not_found);
        }
    }

    for source in &payload.sources {
        cluster_restore_tx(tx, project, source)?;
    }

    let mut restored_members = 0u64;
    for member in &payload.members {
        let updated = tx.execute(
            "UPDATE members SET cluster_key=?3, is_representative=?5 \
             WHERE project=?1 AND member_id=?2 AND cluster_key=?4",
            params![
                project.as_str(),
                member.member_id,
                member.cluster_key,
                target,
                i64::from(member.is_representative)
            ],
        )?;
        restored_members += updated as u64;
    }

    // Only parents the merge brought in leave the target; parents it already had stay.
    let prior: BTreeSet<i64> = payload.target_parent_ids.iter().copied().collect();
    for association in &payload.associations {
        if prior.contains(&association.parent_id) {
            continue;
        }
        tx.execute(
            "DELETE FROM parent_associations WHERE project=?1 AND cluster_key=?2 AND parent_id=?3",
            params![project.as_str(), target, association.parent_id],
        )?;
    }

    let mut restored_associations = 0u64;
    for association in &payload.associations {
        // Parents deleted since the merge took their associations with them.
        let inserted = tx.execute(
            "INSERT INTO parent_associations(project, cluster_key, parent_id, created_at_ms) \
             SELECT ?1, ?2, ?3, ?4 WHERE EXISTS( \
               SELECT 1 FROM parents WHERE project=?1 AND parent_id=?3 \
             )",
            params![
                project.as_str(),
                association.cluster_key,
                association.parent_id,
                association.created_at_ms
            ],
        )?;
        restored_associations += inserted as u64;
    }

    cluster_restore_tx(tx, project, &payload.target)?;
    let fresh = tx.query_row(
        "SELECT COUNT(DISTINCT parent_id) FROM parent_associations WHERE project=?1 AND cluster_key=?2",
        params![project.as_str(), target],
        |row| row.get::<_, i64>(0),
    )?;
    let target_count = if fresh == payload.target.count {
        fresh
    } else {
        refresh_cluster_count_tx(tx, project, target, now_ms)?
    };

    mark_consumed_tx(tx, project, snapshot_id, now_ms)?;

    Ok(ClusterUndoResult {
        snapshot_id,
        target: target.to_string(),
        restored_clusters: payload.sources.iter().map(|row| row.key.clone()).collect(),
        restored_members,
        restored_associations,
        target_count,
    })
}
