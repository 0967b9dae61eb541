//! Link invariants: referential endpoints, composite-key dedup (also under
//! contention), self-link rejection, dependency cycle prevention.

mod common;

use common::{harness, phase, requirement, solution};
use planstore::model::{LinkDraft, PlanRecord, RelationType};
use planstore::StoreError;

#[tokio::test]
async fn link_endpoints_must_exist_and_differ() {
    let h = harness().await;
    let ctx = h.context().await;
    let req = ctx.requirements().add(requirement("target")).await.unwrap();

    let err = ctx
        .linking()
        .create(LinkDraft::new("ghost", req.id(), RelationType::Implements))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    let err = ctx
        .linking()
        .create(LinkDraft::new(req.id(), req.id(), RelationType::References))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));
}

#[tokio::test]
async fn link_exists_flips_exactly_once_per_composite() {
    let h = harness().await;
    let ctx = h.context().await;
    let req = ctx.requirements().add(requirement("R")).await.unwrap();
    let sol = ctx
        .solutions()
        .propose(solution("S", vec![req.id().to_string()]))
        .await
        .unwrap();

    let links = ctx.link_repo();
    assert!(!links
        .link_exists(sol.id(), req.id(), RelationType::Implements)
        .await
        .unwrap());

    ctx.linking()
        .create(LinkDraft::new(sol.id(), req.id(), RelationType::Implements))
        .await
        .unwrap();

    assert!(links
        .link_exists(sol.id(), req.id(), RelationType::Implements)
        .await
        .unwrap());

    // Same composite again → duplicate conflict.
    let err = ctx
        .linking()
        .create(LinkDraft::new(sol.id(), req.id(), RelationType::Implements))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));

    // A different relation type on the same pair is a different edge.
    ctx.linking()
        .create(LinkDraft::new(sol.id(), req.id(), RelationType::References))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_identical_creates_yield_one_link_and_one_conflict() {
    let h = harness().await;
    let ctx = h.context().await;
    let req = ctx.requirements().add(requirement("R")).await.unwrap();
    let sol = ctx
        .solutions()
        .propose(solution("S", vec![req.id().to_string()]))
        .await
        .unwrap();

    let draft = LinkDraft::new(sol.id(), req.id(), RelationType::Implements);
    let first = {
        let ctx = ctx.clone();
        let draft = draft.clone();
        tokio::spawn(async move { ctx.linking().create(draft).await })
    };
    let second = {
        let ctx = ctx.clone();
        let draft = draft.clone();
        tokio::spawn(async move { ctx.linking().create(draft).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::Duplicate { .. })))
        .count();
    assert_eq!(ok, 1, "exactly one create succeeds");
    assert_eq!(duplicates, 1, "the loser sees a duplicate conflict");

    assert_eq!(ctx.link_repo().count().await, 1);
}

#[tokio::test]
async fn depends_on_cycle_is_rejected_and_edge_set_unchanged() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();
    let a = phases.add(phase("A")).await.unwrap();
    let b = phases.add(phase("B")).await.unwrap();
    let c = phases.add(phase("C")).await.unwrap();

    ctx.linking()
        .create(LinkDraft::new(a.id(), b.id(), RelationType::DependsOn))
        .await
        .unwrap();
    ctx.linking()
        .create(LinkDraft::new(b.id(), c.id(), RelationType::DependsOn))
        .await
        .unwrap();

    let err = ctx
        .linking()
        .create(LinkDraft::new(c.id(), a.id(), RelationType::DependsOn))
        .await
        .unwrap_err();
    match err {
        StoreError::Integrity(message) => {
            assert!(message.contains("Circular dependency detected"), "{}", message)
        }
        other => panic!("expected integrity error, got {}", other),
    }

    let remaining = ctx
        .link_repo()
        .find_all_links(Some(RelationType::DependsOn))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining
        .iter()
        .all(|link| link.source_id != c.id() || link.target_id != a.id()));
}

#[tokio::test]
async fn longer_dependency_chains_stay_acyclic() {
    let h = harness().await;
    let ctx = h.context().await;
    let phases = ctx.phases();
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            phases
                .add(phase(&format!("chain-{}", i)))
                .await
                .unwrap()
                .core
                .id,
        );
    }
    for window in ids.windows(2) {
        ctx.linking()
            .create(LinkDraft::new(&window[0], &window[1], RelationType::DependsOn))
            .await
            .unwrap();
    }
    // Closing the loop from any downstream node back upstream must fail.
    let err = ctx
        .linking()
        .create(LinkDraft::new(&ids[4], &ids[1], RelationType::DependsOn))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    // A diamond (two paths, no cycle) is fine.
    ctx.linking()
        .create(LinkDraft::new(&ids[0], &ids[2], RelationType::DependsOn))
        .await
        .unwrap();
}

#[tokio::test]
async fn deleting_an_entity_cascades_its_links() {
    let h = harness().await;
    let ctx = h.context().await;
    let req = ctx.requirements().add(requirement("R")).await.unwrap();
    let sol = ctx
        .solutions()
        .propose(solution("S", vec![req.id().to_string()]))
        .await
        .unwrap();
    ctx.linking()
        .create(LinkDraft::new(sol.id(), req.id(), RelationType::Implements))
        .await
        .unwrap();
    ctx.linking()
        .create(LinkDraft::new(req.id(), sol.id(), RelationType::References))
        .await
        .unwrap();

    ctx.requirements().delete(req.id()).await.unwrap();
    assert_eq!(ctx.link_repo().count().await, 0);
}
