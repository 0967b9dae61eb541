//! Query service: LIKE search, trace, validate, export, health.

mod common;

use common::{artifact, harness, phase, requirement, solution};
use planstore::model::{EntityKind, LinkDraft, PlanRecord, RelationType};
use planstore::service::{ExportFormat, ValidationLevel};

#[tokio::test]
async fn sql_like_search_over_titles() {
    let h = harness().await;
    let ctx = h.context().await;
    let requirements = ctx.requirements();
    requirements
        .add(requirement("User Authentication Service"))
        .await
        .unwrap();
    requirements
        .add(requirement("Database Service Layer"))
        .await
        .unwrap();
    requirements.add(requirement("API Gateway")).await.unwrap();

    let queries = ctx.queries();
    let kinds = [EntityKind::Requirement];

    let hits = queries.search("%SERVICE%", Some(&kinds)).await.unwrap();
    assert_eq!(hits.len(), 2);

    let hits = queries.search("_PI Gateway", Some(&kinds)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title.as_deref(), Some("API Gateway"));

    let hits = queries.search("", Some(&kinds)).await.unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn search_can_count_links() {
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

    let hits = ctx
        .queries()
        .search("", Some(&[EntityKind::Link]))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity_type, EntityKind::Link);
}

#[tokio::test]
async fn trace_walks_requirement_to_artifacts() {
    let h = harness().await;
    let ctx = h.context().await;
    let req = ctx.requirements().add(requirement("traced")).await.unwrap();
    let sol = ctx
        .solutions()
        .propose(solution("S", vec![req.id().to_string()]))
        .await
        .unwrap();
    let ph = ctx.phases().add(phase("build")).await.unwrap();
    ctx.linking()
        .create(LinkDraft::new(ph.id(), sol.id(), RelationType::Implements))
        .await
        .unwrap();
    let mut art = artifact("output");
    art.related_phase_id = Some(ph.core.id.clone());
    let art = ctx.artifacts().add(art).await.unwrap();

    let report = ctx.queries().trace(req.id()).await.unwrap();
    assert_eq!(report.requirement.core.id, req.core.id);
    assert_eq!(report.solutions.len(), 1);
    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.artifacts.len(), 1);
    assert_eq!(report.artifacts[0].core.id, art.core.id);
}

#[tokio::test]
async fn validate_flags_uncovered_and_orphans() {
    let h = harness().await;
    let ctx = h.context().await;
    ctx.requirements().add(requirement("lonely")).await.unwrap();
    ctx.solutions().propose(solution("aimless", vec![])).await.unwrap();

    let report = ctx.queries().validate(ValidationLevel::Basic).await.unwrap();
    assert!(report.ok, "warnings only: {:?}", report.findings);
    let categories: Vec<&str> = report
        .findings
        .iter()
        .map(|f| f.category.as_str())
        .collect();
    assert!(categories.contains(&"uncovered-requirement"));
    assert!(categories.contains(&"orphan-solution"));
}

#[tokio::test]
async fn validate_strict_reports_broken_references_as_errors() {
    let h = harness().await;
    let ctx = h.context().await;
    let req = ctx.requirements().add(requirement("R")).await.unwrap();
    let sol = ctx
        .solutions()
        .propose(solution("S", vec![req.id().to_string()]))
        .await
        .unwrap();
    // Delete the requirement via the repository so the solution's
    // `addressing` pointer dangles.
    ctx.requirement_repo().delete(req.id()).await.unwrap();

    let report = ctx.queries().validate(ValidationLevel::Strict).await.unwrap();
    assert!(!report.ok);
    assert!(report
        .findings
        .iter()
        .any(|f| f.category == "broken-reference" && f.id.as_deref() == Some(sol.id())));
}

#[tokio::test]
async fn export_writes_markdown_and_json() {
    let h = harness().await;
    let ctx = h.context().await;
    ctx.requirements().add(requirement("exported")).await.unwrap();
    ctx.phases().add(phase("step one")).await.unwrap();

    let markdown = ctx.queries().export(ExportFormat::Markdown, None).await.unwrap();
    assert!(markdown.content.contains("## Requirements"));
    assert!(markdown.content.contains("exported"));
    assert!(markdown.path.exists());

    let json_export = ctx.queries().export(ExportFormat::Json, None).await.unwrap();
    let doc: serde_json::Value = serde_json::from_str(&json_export.content).unwrap();
    assert_eq!(doc["requirements"].as_array().unwrap().len(), 1);
    assert_eq!(doc["phases"].as_array().unwrap().len(), 1);

    // Section selection drops everything else.
    let partial = ctx
        .queries()
        .export(ExportFormat::Json, Some(&[EntityKind::Phase]))
        .await
        .unwrap();
    let doc: serde_json::Value = serde_json::from_str(&partial.content).unwrap();
    assert!(doc["requirements"].as_array().unwrap().is_empty());
    assert_eq!(doc["phases"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn health_summarizes_counts_and_completion() {
    let h = harness().await;
    let ctx = h.context().await;
    ctx.requirements().add(requirement("R")).await.unwrap();
    let p1 = ctx.phases().add(phase("one")).await.unwrap();
    ctx.phases().add(phase("two")).await.unwrap();
    ctx.phases().complete_and_advance(p1.id()).await.unwrap();

    let health = ctx.queries().health().await.unwrap();
    assert_eq!(health.statistics.total_requirements, 1);
    assert_eq!(health.statistics.total_phases, 2);
    assert_eq!(health.statistics.completion_percentage, 50);
    assert!(health.history_enabled);
}
