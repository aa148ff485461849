#![forbid(unsafe_code)]

mod centroid;
mod snapshot;
mod undo;

pub use snapshot::{MemberKeySnapshot, MergeSnapshotPayload};

use super::associations::association_rows_tx;
use super::clusters::{cluster_parent_ids_on, cluster_row_tx};
use super::members::{member_features_tx, member_keys_tx};
use super::*;
use rusqlite::{TransactionBehavior, params};

/// How one source association was folded into the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationMove {
    Moved,
    /// The target already links this parent; the source row was dropped.
    AlreadyAssociated,
}

fn move_association_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    source: &str,
    target: &str,
    parent_id: i64,
) -> Result<AssociationMove, StoreError> {
    match tx.execute(
        "UPDATE parent_associations SET cluster_key=?3 \
         WHERE project=?1 AND cluster_key=?2 AND parent_id=?4",
        params![project.as_str(), source, target, parent_id],
    ) {
        Ok(_) => Ok(AssociationMove::Moved),
        Err(err) if is_duplicate_key(&err) => {
            tx.execute(
                "DELETE FROM parent_associations WHERE project=?1 AND cluster_key=?2 AND parent_id=?3",
                params![project.as_str(), source, parent_id],
            )?;
            Ok(AssociationMove::AlreadyAssociated)
        }
        Err(err) => Err(err.into()),
    }
}

fn begin_immediate(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| StoreError::from(err).into_aborted())
}

impl SqliteStore {
    /// Folds every source cluster into `request.target` in one transaction. The snapshot row is
    /// written before any other change so the prior state is always recoverable by
    /// [`SqliteStore::cluster_merge_undo`].
    pub fn cluster_merge(
        &mut self,
        project: &ProjectId,
        request: ClusterMergeRequest,
    ) -> Result<ClusterMergeResult, StoreError> {
        let target = request.target;
        if request.sources.is_empty() {
            return Err(StoreError::InvalidInput(
                "cluster_merge.sources must not be empty",
            ));
        }
        let mut sources = request.sources;
        sources.sort();
        sources.dedup();
        if sources.contains(&target) {
            return Err(StoreError::SelfMergeRejected {
                key: target.into_string(),
            });
        }

        let now_ms = now_ms();
        let tx = begin_immediate(&mut self.conn)?;
        let result = merge_tx(&tx, project, &target, &sources, now_ms)
            .map_err(StoreError::into_aborted)?;
        tx.commit()
            .map_err(|err| StoreError::from(err).into_aborted())?;

        tracing::info!(
            project = project.as_str(),
            target = result.target.as_str(),
            sources = ?result.sources,
            snapshot_id = result.snapshot_id,
            moved_members = result.moved_members,
            duplicates = result.duplicates,
            unique_moved = result.unique_moved,
            final_count = result.final_count,
            "clusters merged"
        );
        Ok(result)
    }
}

fn merge_tx(
    tx: &Transaction<'_>,
    project: &ProjectId,
    target: &ClusterKey,
    sources: &[ClusterKey],
    now_ms: i64,
) -> Result<ClusterMergeResult, StoreError> {
    let target_row =
        cluster_row_tx(tx, project, target.as_str())?.ok_or_else(|| StoreError::ClusterNotFound {
            key: target.as_str().to_string(),
        })?;

    let mut source_rows = Vec::with_capacity(sources.len());
    let mut members = Vec::new();
    let mut associations = Vec::new();
    for source in sources {
        let row = cluster_row_tx(tx, project, source.as_str())?.ok_or_else(|| {
            StoreError::ClusterNotFound {
                key: source.as_str().to_string(),
            }
        })?;
        source_rows.push(row);
        members.extend(
            member_keys_tx(tx, project, source.as_str())?
                .into_iter()
                .map(
                    |(member_id, cluster_key, is_representative)| MemberKeySnapshot {
                        member_id,
                        cluster_key,
                        is_representative,
                    },
                ),
        );
        associations.extend(association_rows_tx(tx, project, source.as_str())?);
    }

    let payload = MergeSnapshotPayload {
        target_parent_ids: cluster_parent_ids_on(tx, project, target.as_str())?,
        target: target_row,
        sources: source_rows,
        members,
        associations,
    };
    let snapshot_id = snapshot::insert_snapshot_tx(tx, project, &payload, now_ms)?;

    let mut moved_members = 0u64;
    let mut duplicates = 0u64;
    let mut unique_moved = 0u64;
    for source in sources {
        let moved = tx.execute(
            "UPDATE members SET cluster_key=?3 WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), source.as_str(), target.as_str()],
        )?;
        moved_members += moved as u64;

        for association in payload
            .associations
            .iter()
            .filter(|row| row.cluster_key == source.as_str())
        {
            match move_association_tx(
                tx,
                project,
                source.as_str(),
                target.as_str(),
                association.parent_id,
            )? {
                AssociationMove::Moved => unique_moved += 1,
                AssociationMove::AlreadyAssociated => duplicates += 1,
            }
        }

        tx.execute(
            "DELETE FROM clusters WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), source.as_str()],
        )?;
    }

    let mut representative = payload.target.representative_member_id;
    if representative.is_none()
        && let Some(adopted) = payload
            .sources
            .iter()
            .find_map(|row| row.representative_member_id)
    {
        tx.execute(
            "UPDATE clusters SET representative_member_id=?3 WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), target.as_str(), adopted],
        )?;
        representative = Some(adopted);
    }

    // The target keeps a single flagged member: its representative.
    for member in payload
        .members
        .iter()
        .filter(|member| member.is_representative && Some(member.member_id) != representative)
    {
        tx.execute(
            "UPDATE members SET is_representative=0 WHERE project=?1 AND member_id=?2",
            params![project.as_str(), member.member_id],
        )?;
    }

    let features = member_features_tx(tx, project, target.as_str())?;
    if let Some(centroid) = centroid::mean_centroid(&features) {
        tx.execute(
            "UPDATE clusters SET centroid=?3 WHERE project=?1 AND cluster_key=?2",
            params![project.as_str(), target.as_str(), centroid],
        )?;
    }

    let final_count = refresh_cluster_count_tx(tx, project, target.as_str(), now_ms)?;

    Ok(ClusterMergeResult {
        snapshot_id,
        target: target.as_str().to_string(),
        sources: sources.iter().map(|key| key.as_str().to_string()).collect(),
        moved_members,
        duplicates,
        unique_moved,
        final_count,
    })
}
