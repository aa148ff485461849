#![forbid(unsafe_code)]

use cv_core::filter::FilterSpec;
use cv_core::ids::{ClusterKey, ProjectId};
use cv_core::model::{Geometry, MediaKind};
use cv_storage::{
    ClusterMergeRequest, ClusterUpsertRequest, MemberInsertRequest, ParentUpsertRequest,
    SqliteStore, StoreError,
};

fn key(value: &str) -> ClusterKey {
    ClusterKey::try_new(value).expect("cluster key")
}

fn feature(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn add_parent(store: &mut SqliteStore, project: &ProjectId, parent_id: i64) {
    store
        .parent_upsert(
            project,
            ParentUpsertRequest {
                parent_id,
                path: format!("/photos/{parent_id}.jpg"),
                taken_at_ms: Some(parent_id * 1_000),
                media_kind: MediaKind::Image,
                duration_ms: None,
                width: Some(4000),
                height: Some(3000),
            },
        )
        .expect("parent upsert");
}

/// Creates `cluster` with one member and one association per parent.
fn seed_cluster(
    store: &mut SqliteStore,
    project: &ProjectId,
    cluster: &str,
    parents: &[i64],
    vector: &[f32],
) {
    store
        .cluster_upsert(
            project,
            ClusterUpsertRequest {
                key: key(cluster),
                label: None,
            },
        )
        .expect("cluster upsert");
    for (index, parent_id) in parents.iter().enumerate() {
        store
            .member_insert(
                project,
                MemberInsertRequest {
                    parent_id: *parent_id,
                    cluster_key: key(cluster),
                    feature: feature(vector),
                    confidence: 0.9,
                    geometry: Geometry::default(),
                    is_representative: index == 0,
                },
            )
            .expect("member insert");
        store
            .parent_association_insert(project, &key(cluster), *parent_id)
            .expect("association insert");
    }
}

fn seeded_store() -> (tempfile::TempDir, SqliteStore, ProjectId) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut store = SqliteStore::open(dir.path()).expect("open store");
    let project = ProjectId::try_new("library").expect("project id");
    store.project_init(&project).expect("project init");
    for parent_id in 1..=6 {
        add_parent(&mut store, &project, parent_id);
    }
    seed_cluster(&mut store, &project, "alice", &[1, 2, 3], &[1.0, 0.0]);
    seed_cluster(&mut store, &project, "bob", &[3, 4, 5], &[0.0, 1.0]);
    (dir, store, project)
}

#[test]
fn merge_deduplicates_shared_parents() {
    let (_dir, mut store, project) = seeded_store();

    let result = store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("alice"),
                sources: vec![key("bob")],
            },
        )
        .expect("merge");

    assert_eq!(result.target, "alice");
    assert_eq!(result.sources, vec!["bob".to_string()]);
    assert_eq!(result.moved_members, 3);
    assert_eq!(result.duplicates, 1);
    assert_eq!(result.unique_moved, 2);
    assert_eq!(result.final_count, 5);

    assert_eq!(
        store
            .cluster_parent_ids(&project, &key("alice"))
            .expect("parent ids"),
        vec![1, 2, 3, 4, 5]
    );
    assert!(
        store
            .cluster_get(&project, &key("bob"))
            .expect("cluster get")
            .is_none()
    );

    let target = store
        .cluster_get(&project, &key("alice"))
        .expect("cluster get")
        .expect("target present");
    assert_eq!(target.count, 5);
    assert_eq!(target.centroid, Some(feature(&[0.5, 0.5])));
}

#[test]
fn merge_adopts_source_representative_when_target_has_none() {
    let (_dir, mut store, project) = seeded_store();
    store
        .cluster_upsert(
            &project,
            ClusterUpsertRequest {
                key: key("empty"),
                label: Some("  ".to_string()),
            },
        )
        .expect("cluster upsert");
    let bob = store
        .cluster_get(&project, &key("bob"))
        .expect("cluster get")
        .expect("bob present");

    store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("empty"),
                sources: vec![key("bob")],
            },
        )
        .expect("merge");

    let merged = store
        .cluster_get(&project, &key("empty"))
        .expect("cluster get")
        .expect("target present");
    assert_eq!(merged.label, None);
    assert_eq!(merged.representative_member_id, bob.representative_member_id);
    assert_eq!(merged.count, 3);
}

#[test]
fn merge_rejects_target_listed_as_source() {
    let (_dir, mut store, project) = seeded_store();
    let before = store
        .cluster_get(&project, &key("alice"))
        .expect("cluster get");

    let err = store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("alice"),
                sources: vec![key("bob"), key("alice")],
            },
        )
        .expect_err("self merge must fail");
    match err {
        StoreError::SelfMergeRejected { key } => assert_eq!(key, "alice"),
        other => panic!("expected SelfMergeRejected, got {other:?}"),
    }

    assert_eq!(
        store
            .cluster_get(&project, &key("alice"))
            .expect("cluster get"),
        before
    );
    assert!(
        store
            .cluster_get(&project, &key("bob"))
            .expect("cluster get")
            .is_some()
    );
    assert!(
        store
            .merge_snapshots_list(&project, 10)
            .expect("snapshots")
            .is_empty()
    );
}

#[test]
fn merge_rejects_empty_sources() {
    let (_dir, mut store, project) = seeded_store();
    let err = store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("alice"),
                sources: Vec::new(),
            },
        )
        .expect_err("empty sources must fail");
    assert_eq!(err.code(), "INVALID_INPUT");
}

#[test]
fn merging_a_consumed_source_again_reports_cluster_not_found() {
    let (_dir, mut store, project) = seeded_store();
    let request = ClusterMergeRequest {
        target: key("alice"),
        sources: vec![key("bob")],
    };
    store
        .cluster_merge(&project, request.clone())
        .expect("first merge");

    let err = store
        .cluster_merge(&project, request)
        .expect_err("second merge must fail");
    match err {
        StoreError::ClusterNotFound { key } => assert_eq!(key, "bob"),
        other => panic!("expected ClusterNotFound, got {other:?}"),
    }
    assert_eq!(
        store
            .merge_snapshots_list(&project, 10)
            .expect("snapshots")
            .len(),
        1
    );
}

#[test]
fn merge_of_several_sources_counts_distinct_parents_once() {
    let (_dir, mut store, project) = seeded_store();
    seed_cluster(&mut store, &project, "carol", &[5, 6], &[1.0, 1.0]);

    let result = store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("alice"),
                sources: vec![key("carol"), key("bob"), key("carol")],
            },
        )
        .expect("merge");

    assert_eq!(result.sources, vec!["bob".to_string(), "carol".to_string()]);
    assert_eq!(result.moved_members, 5);
    assert_eq!(result.unique_moved, 3);
    assert_eq!(result.duplicates, 2);
    assert_eq!(result.final_count, 6);
}

#[test]
fn merged_cluster_keeps_a_single_flagged_representative() {
    let (_dir, mut store, project) = seeded_store();

    store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("alice"),
                sources: vec![key("bob")],
            },
        )
        .expect("merge");

    let target = store
        .cluster_get(&project, &key("alice"))
        .expect("cluster get")
        .expect("target present");
    let flagged: Vec<i64> = store
        .members_query(&project, &FilterSpec::ClusterKey(key("alice")))
        .expect("members")
        .into_iter()
        .filter(|member| member.is_representative)
        .map(|member| member.member_id)
        .collect();
    assert_eq!(flagged.len(), 1, "flagged members: {flagged:?}");
    assert_eq!(target.representative_member_id, flagged.first().copied());
}

#[test]
fn adopted_representative_stays_flagged_after_merge() {
    let (_dir, mut store, project) = seeded_store();
    store
        .cluster_upsert(
            &project,
            ClusterUpsertRequest {
                key: key("empty"),
                label: None,
            },
        )
        .expect("cluster upsert");

    seed_cluster(&mut store, &project, "carol", &[6], &[1.0, 1.0]);
    store
        .cluster_merge(
            &project,
            ClusterMergeRequest {
                target: key("empty"),
                sources: vec![key("bob"), key("carol")],
            },
        )
        .expect("merge");

    let merged = store
        .cluster_get(&project, &key("empty"))
        .expect("cluster get")
        .expect("target present");
    let flagged: Vec<i64> = store
        .members_query(&project, &FilterSpec::ClusterKey(key("empty")))
        .expect("members")
        .into_iter()
        .filter(|member| member.is_representative)
        .map(|member| member.member_id)
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(merged.representative_member_id, flagged.first().copied());
}
