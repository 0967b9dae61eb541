//! Phase tree semantics: ordering, paths, moves, reparenting deletes, next
//! actions.

mod common;

use common::{harness, phase};
use planstore::model::{PhaseStatus, PlanRecord, Priority, MAX_ORDER};
use planstore::service::{ParentChange, StatusUpdate};
use planstore::StoreError;

#[tokio::test]
async fn orders_and_paths_derive_from_parents() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();

    let root = phases.add(phase("root").order(2)).await.unwrap();
    assert_eq!(root.path, "2");
    assert_eq!(root.depth, 0);

    let child = phases
        .add(phase("child").parent(root.id()))
        .await
        .unwrap();
    assert_eq!(child.order, 1);
    assert_eq!(child.path, "2.1");
    assert_eq!(child.depth, 1);

    let sibling = phases
        .add(phase("sibling").parent(root.id()))
        .await
        .unwrap();
    assert_eq!(sibling.order, 2);
    assert_eq!(sibling.path, "2.2");
}

#[tokio::test]
async fn order_is_validated_and_unique_among_siblings() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();
    phases.add(phase("first").order(7)).await.unwrap();

    assert!(matches!(
        phases.add(phase("zero").order(0)).await.unwrap_err(),
        StoreError::Validation(_)
    ));
    assert!(matches!(
        phases
            .add(phase("big").order(MAX_ORDER + 1))
            .await
            .unwrap_err(),
        StoreError::Validation(_)
    ));
    assert!(matches!(
        phases.add(phase("clash").order(7)).await.unwrap_err(),
        StoreError::Validation(_)
    ));
}

#[tokio::test]
async fn delete_without_children_reparents_with_sane_orders() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();

    let parent = phases.add(phase("P").order(10)).await.unwrap();
    let child = phases
        .add(phase("C").parent(parent.id()).order(1))
        .await
        .unwrap();

    phases.delete(parent.id(), false).await.unwrap();

    let child_after = phases.get(child.id()).await.unwrap();
    assert_eq!(child_after.parent_id, None);
    assert!((1..=MAX_ORDER).contains(&child_after.order));
    assert_eq!(child_after.path, child_after.order.to_string());
    assert_eq!(child_after.depth, 0);
}

#[tokio::test]
async fn delete_with_children_removes_the_subtree() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();

    let root = phases.add(phase("root")).await.unwrap();
    let mid = phases.add(phase("mid").parent(root.id())).await.unwrap();
    phases.add(phase("leaf").parent(mid.id())).await.unwrap();
    let other = phases.add(phase("other")).await.unwrap();

    phases.delete(root.id(), true).await.unwrap();

    let remaining = phases.get_tree().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].phase.core.id, other.core.id);
}

#[tokio::test]
async fn move_recomputes_subtree_paths() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();

    let a = phases.add(phase("A").order(1)).await.unwrap();
    let b = phases.add(phase("B").order(2)).await.unwrap();
    let child = phases.add(phase("child").parent(b.id())).await.unwrap();
    let grandchild = phases
        .add(phase("grandchild").parent(child.id()))
        .await
        .unwrap();

    // Move B (with its subtree) under A, default order = last sibling + 1.
    let moved = phases
        .move_phase(b.id(), ParentChange::To(a.id().to_string()), None)
        .await
        .unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(a.id()));
    assert_eq!(moved.path, "1.1");
    assert_eq!(moved.depth, 1);

    let child_after = phases.get(child.id()).await.unwrap();
    assert_eq!(child_after.path, "1.1.1");
    assert_eq!(child_after.depth, 2);
    let grandchild_after = phases.get(grandchild.id()).await.unwrap();
    assert_eq!(grandchild_after.path, "1.1.1.1");
    assert_eq!(grandchild_after.depth, 3);
}

#[tokio::test]
async fn move_under_own_subtree_is_rejected() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();
    let root = phases.add(phase("root")).await.unwrap();
    let child = phases.add(phase("child").parent(root.id())).await.unwrap();

    let err = phases
        .move_phase(root.id(), ParentChange::To(child.id().to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    let err = phases
        .move_phase(root.id(), ParentChange::To(root.id().to_string()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn update_status_tracks_progress_notes_and_effort() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();
    let p = phases.add(phase("work")).await.unwrap();

    let updated = phases
        .update_status(
            p.id(),
            StatusUpdate {
                status: PhaseStatus::InProgress,
                progress: Some(40),
                notes: Some("halfway through the parser".into()),
                actual_effort: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, PhaseStatus::InProgress);
    assert_eq!(updated.progress, 40);
    assert_eq!(updated.notes.len(), 1);

    // Completing without explicit progress implies 100.
    let done = phases
        .update_status(
            p.id(),
            StatusUpdate {
                status: PhaseStatus::Completed,
                progress: None,
                notes: None,
                actual_effort: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(done.progress, 100);
}

#[tokio::test]
async fn next_actions_are_ready_leaves_by_priority_then_order() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();

    let root = phases.add(phase("root")).await.unwrap();
    let mut low = phase("leaf-low").parent(root.id()).order(1);
    low.priority = Some(Priority::Low);
    let mut critical = phase("leaf-critical").parent(root.id()).order(2);
    critical.priority = Some(Priority::Critical);
    let low = phases.add(low).await.unwrap();
    let critical = phases.add(critical).await.unwrap();
    let done = phases.add(phase("done").parent(root.id()).order(3)).await.unwrap();
    phases
        .update_status(
            done.id(),
            StatusUpdate {
                status: PhaseStatus::Completed,
                ..StatusUpdate::default()
            },
        )
        .await
        .unwrap();

    let next = phases.get_next_actions().await.unwrap();
    let ids: Vec<&str> = next.iter().map(|p| p.id()).collect();
    // The root has children, so it is not a leaf; the completed leaf is
    // filtered; critical outranks low.
    assert_eq!(ids, vec![critical.id(), low.id()]);
}

#[tokio::test]
async fn complete_and_advance_returns_following_actions() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();
    let first = phases.add(phase("first").order(1)).await.unwrap();
    let second = phases.add(phase("second").order(2)).await.unwrap();

    let outcome = phases.complete_and_advance(first.id()).await.unwrap();
    assert_eq!(outcome.completed.status, PhaseStatus::Completed);
    assert_eq!(outcome.completed.progress, 100);
    assert_eq!(outcome.next_actions.len(), 1);
    assert_eq!(outcome.next_actions[0].core.id, second.core.id);
}
