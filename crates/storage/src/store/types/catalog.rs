#![forbid(unsafe_code)]

use cv_core::model::{Geometry, MediaKind};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq)]
pub struct ParentRow {
    pub parent_id: i64,
    pub path: String,
    pub taken_at_ms: Option<i64>,
    pub media_kind: MediaKind,
    pub duration_ms: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterRow {
    pub key: String,
    pub label: Option<String>,
    pub centroid: Option<Vec<u8>>,
    pub representative_member_id: Option<i64>,
    pub count: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemberRow {
    pub member_id: i64,
    pub parent_id: i64,
    pub cluster_key: String,
    pub feature: Vec<u8>,
    pub confidence: f64,
    pub geometry: Geometry,
    pub is_representative: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentAssociationRow {
    pub cluster_key: String,
    pub parent_id: i64,
    pub created_at_ms: i64,
}

/// Outcome of inserting an association; a duplicate is a normal branch, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationWrite {
    Inserted,
    AlreadyPresent,
}
