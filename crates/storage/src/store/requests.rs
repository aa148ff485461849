#![forbid(unsafe_code)]

use cv_core::ids::ClusterKey;
use cv_core::model::{Geometry, MediaKind};

#[derive(Clone, Debug, PartialEq)]
pub struct ParentUpsertRequest {
    pub parent_id: i64,
    pub path: String,
    pub taken_at_ms: Option<i64>,
    pub media_kind: MediaKind,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterUpsertRequest {
    pub key: ClusterKey,
    pub label: Option<String>,
}

/// One detected feature as supplied by the detection collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberInsertRequest {
    pub parent_id: i64,
    pub cluster_key: ClusterKey,
    pub feature: Vec<u8>,
    pub confidence: f64,
    pub geometry: Geometry,
    pub is_representative: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterMergeRequest {
    pub target: ClusterKey,
    pub sources: Vec<ClusterKey>,
}
