#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterMergeResult {
    pub snapshot_id: i64,
    pub target: String,
    pub sources: Vec<String>,
    pub moved_members: u64,
    pub duplicates: u64,
    pub unique_moved: u64,
    pub final_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterUndoResult {
    pub snapshot_id: i64,
    pub target: String,
    pub restored_clusters: Vec<String>,
    pub restored_members: u64,
    pub restored_associations: u64,
    pub target_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeSnapshotRow {
    pub snapshot_id: i64,
    pub target: String,
    pub sources: Vec<String>,
    pub created_at_ms: i64,
    pub consumed_at_ms: Option<i64>,
}
