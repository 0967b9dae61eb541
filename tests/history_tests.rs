//! Version history recording, bounded depth, and diffs.

mod common;

use common::{harness, harness_with, requirement};
use planstore::model::{PlanRecord, RequirementPatch};

fn patch(description: &str) -> RequirementPatch {
    RequirementPatch {
        description: Some(description.to_string()),
        ..RequirementPatch::default()
    }
}

#[tokio::test]
async fn updates_snapshot_the_pre_update_state() {
    let h = harness().await;
    let ctx = h.context().await;
    let requirements = ctx.requirements();
    let r = requirements.add(requirement("tracked")).await.unwrap();

    requirements.update(r.id(), patch("second")).await.unwrap();
    requirements.update(r.id(), patch("third")).await.unwrap();

    let history = requirements.get_history(r.id()).await.unwrap();
    assert_eq!(history.versions.len(), 2);
    assert_eq!(history.versions[0].version, 1);
    assert_eq!(history.versions[1].version, 2);
    assert_eq!(
        history.versions[1].snapshot["description"],
        "second"
    );
}

#[tokio::test]
async fn history_depth_is_bounded_with_oldest_evicted() {
    let h = harness_with(|draft| {
        draft.max_history_depth = Some(3);
    })
    .await;
    let ctx = h.context().await;
    let requirements = ctx.requirements();
    let r = requirements.add(requirement("bounded")).await.unwrap();

    for i in 0..6 {
        requirements
            .update(r.id(), patch(&format!("rev {}", i)))
            .await
            .unwrap();
    }

    let history = requirements.get_history(r.id()).await.unwrap();
    assert_eq!(history.versions.len(), 3);
    // Versions 1..=3 were evicted; 4..=6 remain, oldest first.
    let versions: Vec<u64> = history.versions.iter().map(|v| v.version).collect();
    assert_eq!(versions, vec![4, 5, 6]);
}

#[tokio::test]
async fn disabled_history_records_nothing() {
    let h = harness_with(|draft| {
        draft.enable_history = Some(false);
    })
    .await;
    let ctx = h.context().await;
    let requirements = ctx.requirements();
    let r = requirements.add(requirement("untracked")).await.unwrap();
    requirements.update(r.id(), patch("changed")).await.unwrap();

    let history = requirements.get_history(r.id()).await.unwrap();
    assert!(history.versions.is_empty());
}

#[tokio::test]
async fn diff_is_empty_iff_versions_are_equal() {
    let h = harness().await;
    let ctx = h.context().await;
    let requirements = ctx.requirements();
    let r = requirements.add(requirement("diffed")).await.unwrap();
    requirements.update(r.id(), patch("second")).await.unwrap();
    requirements.update(r.id(), patch("third")).await.unwrap();

    assert!(requirements.diff(r.id(), 1, 1).await.unwrap().is_empty());
    assert!(requirements.diff(r.id(), 2, 2).await.unwrap().is_empty());

    let changes = requirements.diff(r.id(), 1, 2).await.unwrap();
    assert!(!changes.is_empty());
    assert!(changes.iter().any(|c| c.field == "description"));
}

#[tokio::test]
async fn diff_against_the_live_version_synthesizes_it() {
    let h = harness().await;
    let ctx = h.context().await;
    let requirements = ctx.requirements();
    let r = requirements.add(requirement("live")).await.unwrap();
    requirements.update(r.id(), patch("current")).await.unwrap();

    // Version 2 is the live entity, not a recorded snapshot.
    let changes = requirements.diff(r.id(), 1, 2).await.unwrap();
    let description = changes
        .iter()
        .find(|c| c.field == "description")
        .expect("description changed");
    assert_eq!(description.to.as_ref().unwrap(), "current");

    // An unknown version is a NotFound, not a panic.
    assert!(requirements.diff(r.id(), 1, 42).await.is_err());
}
