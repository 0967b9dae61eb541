//! Decision supersedure semantics.

mod common;

use common::{decision, harness};
use planstore::model::{DecisionStatus, PlanRecord};
use planstore::service::SupersedeSpec;
use planstore::StoreError;

fn spec_for(decision: &str) -> SupersedeSpec {
    SupersedeSpec {
        title: None,
        question: None,
        context: None,
        decision: decision.to_string(),
    }
}

#[tokio::test]
async fn supersede_by_uuid_reuses_existing_decision() {
    let h = harness().await;
    let ctx = h.context().await;
    let decisions = ctx.decisions();
    let d1 = decisions.record(decision("first", "A")).await.unwrap();
    let d2 = decisions.record(decision("second", "B")).await.unwrap();

    let outcome = decisions
        .supersede(d1.id(), spec_for(d2.id()), "r")
        .await
        .unwrap();
    assert!(outcome.reused_existing);

    let d1_after = decisions.get(d1.id()).await.unwrap();
    let d2_after = decisions.get(d2.id()).await.unwrap();

    assert_eq!(d1_after.status, DecisionStatus::Superseded);
    assert_eq!(d1_after.superseded_by.as_deref(), Some(d2.id()));
    assert_eq!(d2_after.supersedes.as_deref(), Some(d1.id()));
    // The successor's prose is untouched.
    assert_eq!(d2_after.decision, "B");
    // Each side's version bumped exactly once.
    assert_eq!(d1_after.version(), d1.version() + 1);
    assert_eq!(d2_after.version(), d2.version() + 1);
    // No third decision was created.
    assert_eq!(ctx.decision_repo().count(None).await.unwrap(), 2);
}

#[tokio::test]
async fn supersede_with_prose_creates_a_fresh_decision() {
    let h = harness().await;
    let ctx = h.context().await;
    let decisions = ctx.decisions();
    let old = decisions.record(decision("storage", "CSV files")).await.unwrap();

    let outcome = decisions
        .supersede(old.id(), spec_for("JSON files"), "CSV cannot nest")
        .await
        .unwrap();
    assert!(!outcome.reused_existing);
    assert_ne!(outcome.successor.id(), old.id());
    assert_eq!(outcome.successor.decision, "JSON files");
    assert_eq!(outcome.successor.supersedes.as_deref(), Some(old.id()));
    assert_eq!(outcome.superseded.status, DecisionStatus::Superseded);
    assert_eq!(
        outcome.superseded.superseded_by.as_deref(),
        Some(outcome.successor.id())
    );

    // The old decision travels in the successor's alternatives.
    assert!(outcome
        .successor
        .alternatives_considered
        .iter()
        .any(|alt| alt.option == "CSV files"));
}

#[tokio::test]
async fn superseding_twice_fails() {
    let h = harness().await;
    let ctx = h.context().await;
    let decisions = ctx.decisions();
    let old = decisions.record(decision("once", "v1")).await.unwrap();
    decisions
        .supersede(old.id(), spec_for("v2"), "newer")
        .await
        .unwrap();

    let err = decisions
        .supersede(old.id(), spec_for("v3"), "newest")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn superseded_decisions_are_immutable() {
    let h = harness().await;
    let ctx = h.context().await;
    let decisions = ctx.decisions();
    let old = decisions.record(decision("frozen", "v1")).await.unwrap();
    decisions
        .supersede(old.id(), spec_for("v2"), "newer")
        .await
        .unwrap();

    let err = decisions
        .update(
            old.id(),
            planstore::model::DecisionPatch {
                title: Some("rewrite history".into()),
                ..planstore::model::DecisionPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn blank_decision_fields_fail_validation() {
    let h = harness().await;
    let ctx = h.context().await;
    for (title, question, text) in [("", "q", "d"), ("t", "   ", "d"), ("t", "q", "\t")] {
        let err = ctx
            .decisions()
            .record(planstore::model::DecisionDraft::new(title, question, text))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
