//! Read-side plan queries: LIKE search, requirement tracing, consistency
//! validation, exports, and the health summary.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::context::PlanContext;
use crate::core::{Result, StoreError};
use crate::model::{
    Artifact, Decision, EntityKind, Link, Phase, PlanRecord, PlanStatistics, RelationType,
    Requirement, Solution,
};
use crate::query::like_match;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub entity_type: EntityKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceReport {
    pub requirement: Requirement,
    pub solutions: Vec<Solution>,
    pub phases: Vec<Phase>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Basic,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFinding {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub level: ValidationLevel,
    pub findings: Vec<ValidationFinding>,
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub project_id: String,
    pub plan_id: String,
    pub statistics: PlanStatistics,
    pub total_links: usize,
    pub history_enabled: bool,
}

#[derive(Clone)]
pub struct QueryService {
    ctx: PlanContext,
}

impl QueryService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    // ------------------------------------------------------------------
    // search
    // ------------------------------------------------------------------

    /// SQL-LIKE search over titles and descriptions. Links have neither, so
    /// they match on relation type and id; the empty pattern matches every
    /// row of every requested kind.
    pub async fn search(
        &self,
        pattern: &str,
        entity_types: Option<&[EntityKind]>,
    ) -> Result<Vec<SearchHit>> {
        let wanted = |kind: EntityKind| {
            entity_types.map(|kinds| kinds.contains(&kind)).unwrap_or(true)
        };
        let mut hits = Vec::new();

        if wanted(EntityKind::Requirement) {
            for r in self.ctx.inner.requirements.find_all().await? {
                if like_match(&r.title, pattern) || like_match(&r.description, pattern) {
                    hits.push(hit(EntityKind::Requirement, r.id(), Some(&r.title)));
                }
            }
        }
        if wanted(EntityKind::Solution) {
            for s in self.ctx.inner.solutions.find_all().await? {
                if like_match(&s.title, pattern) || like_match(&s.description, pattern) {
                    hits.push(hit(EntityKind::Solution, s.id(), Some(&s.title)));
                }
            }
        }
        if wanted(EntityKind::Decision) {
            for d in self.ctx.inner.decisions.find_all().await? {
                if like_match(&d.title, pattern) || like_match(&d.decision, pattern) {
                    hits.push(hit(EntityKind::Decision, d.id(), Some(&d.title)));
                }
            }
        }
        if wanted(EntityKind::Phase) {
            for p in self.ctx.inner.phases.find_all().await? {
                if like_match(&p.title, pattern) || like_match(&p.description, pattern) {
                    hits.push(hit(EntityKind::Phase, p.id(), Some(&p.title)));
                }
            }
        }
        if wanted(EntityKind::Artifact) {
            for a in self.ctx.inner.artifacts.find_all().await? {
                if like_match(&a.title, pattern) || like_match(&a.description, pattern) {
                    hits.push(hit(EntityKind::Artifact, a.id(), Some(&a.title)));
                }
            }
        }
        if wanted(EntityKind::Link) {
            for link in self.ctx.inner.links.find_all_links(None).await? {
                if like_match(link.relation_type.as_str(), pattern) || like_match(&link.id, pattern)
                {
                    hits.push(hit(EntityKind::Link, &link.id, None));
                }
            }
        }
        Ok(hits)
    }

    // ------------------------------------------------------------------
    // trace
    // ------------------------------------------------------------------

    /// Walk requirement → solutions → phases → artifacts through the link
    /// graph and the `addressing` / `related*` fields.
    pub async fn trace(&self, requirement_id: &str) -> Result<TraceReport> {
        let requirement = self.ctx.inner.requirements.find_by_id(requirement_id).await?;

        // Solutions: `addressing` field plus implements/addresses edges.
        let mut solution_ids: HashSet<String> = HashSet::new();
        for solution in self.ctx.inner.solutions.find_all().await? {
            if solution.addressing.iter().any(|id| id == requirement_id) {
                solution_ids.insert(solution.core.id.clone());
            }
        }
        for relation in [RelationType::Implements, RelationType::Addresses] {
            for link in self
                .ctx
                .inner
                .links
                .find_links_by_target(requirement_id, Some(relation))
                .await?
            {
                if self.ctx.inner.solutions.exists(&link.source_id).await? {
                    solution_ids.insert(link.source_id);
                }
            }
        }
        let solutions = self
            .ctx
            .inner
            .solutions
            .find_by_ids(&solution_ids.iter().cloned().collect::<Vec<_>>())
            .await?;

        // Phases: any edge touching one of the traced solutions.
        let mut phase_ids: HashSet<String> = HashSet::new();
        for solution_id in &solution_ids {
            for link in self
                .ctx
                .inner
                .links
                .find_links_by_entity(solution_id, crate::storage::LinkDirection::Both)
                .await?
            {
                for endpoint in [&link.source_id, &link.target_id] {
                    if endpoint != solution_id && self.ctx.inner.phases.exists(endpoint).await? {
                        phase_ids.insert(endpoint.clone());
                    }
                }
            }
        }
        let phases = self
            .ctx
            .inner
            .phases
            .find_by_ids(&phase_ids.iter().cloned().collect::<Vec<_>>())
            .await?;

        // Artifacts: related-id fields plus has_artifact edges.
        let mut artifact_ids: HashSet<String> = HashSet::new();
        for artifact in self.ctx.inner.artifacts.find_all().await? {
            let related = artifact
                .related_requirement_ids
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|id| id == requirement_id)
                || artifact
                    .related_solution_id
                    .as_deref()
                    .is_some_and(|id| solution_ids.contains(id))
                || artifact
                    .related_phase_id
                    .as_deref()
                    .is_some_and(|id| phase_ids.contains(id));
            if related {
                artifact_ids.insert(artifact.core.id.clone());
            }
        }
        let mut owners: Vec<&str> = vec![requirement_id];
        owners.extend(solution_ids.iter().map(String::as_str));
        owners.extend(phase_ids.iter().map(String::as_str));
        for owner in owners {
            for link in self
                .ctx
                .inner
                .links
                .find_links_by_source(owner, Some(RelationType::HasArtifact))
                .await?
            {
                if self.ctx.inner.artifacts.exists(&link.target_id).await? {
                    artifact_ids.insert(link.target_id);
                }
            }
        }
        let artifacts = self
            .ctx
            .inner
            .artifacts
            .find_by_ids(&artifact_ids.iter().cloned().collect::<Vec<_>>())
            .await?;

        Ok(TraceReport {
            requirement,
            solutions,
            phases,
            artifacts,
        })
    }

    // ------------------------------------------------------------------
    // validate
    // ------------------------------------------------------------------

    pub async fn validate(&self, level: ValidationLevel) -> Result<ValidationReport> {
        let mut findings = Vec::new();
        let requirements = self.ctx.inner.requirements.find_all().await?;
        let solutions = self.ctx.inner.solutions.find_all().await?;
        let phases = self.ctx.inner.phases.find_all().await?;
        let artifacts = self.ctx.inner.artifacts.find_all().await?;
        let links = self.ctx.inner.links.find_all_links(None).await?;

        // Requirements no solution addresses.
        let requirement_ids: HashSet<&str> =
            requirements.iter().map(|r| r.id()).collect();
        for requirement in &requirements {
            let covered = solutions
                .iter()
                .any(|s| s.addressing.iter().any(|id| id == requirement.id()));
            if !covered {
                findings.push(ValidationFinding {
                    severity: Severity::Warning,
                    category: "uncovered-requirement".into(),
                    message: format!("requirement '{}' has no addressing solution", requirement.title),
                    entity_type: Some(EntityKind::Requirement),
                    id: Some(requirement.core.id.clone()),
                });
            }
        }

        // Solutions addressing nothing, or addressing ghosts.
        for solution in &solutions {
            if solution.addressing.is_empty() {
                findings.push(ValidationFinding {
                    severity: Severity::Warning,
                    category: "orphan-solution".into(),
                    message: format!("solution '{}' addresses no requirement", solution.title),
                    entity_type: Some(EntityKind::Solution),
                    id: Some(solution.core.id.clone()),
                });
            }
            for addressed in &solution.addressing {
                if !requirement_ids.contains(addressed.as_str()) {
                    findings.push(ValidationFinding {
                        severity: Severity::Error,
                        category: "broken-reference".into(),
                        message: format!(
                            "solution '{}' addresses missing requirement '{}'",
                            solution.title, addressed
                        ),
                        entity_type: Some(EntityKind::Solution),
                        id: Some(solution.core.id.clone()),
                    });
                }
            }
        }

        // Broken link endpoints.
        for link in &links {
            for endpoint in [&link.source_id, &link.target_id] {
                if self.ctx.entity_kind_of(endpoint).await?.is_none() {
                    findings.push(ValidationFinding {
                        severity: Severity::Error,
                        category: "broken-link".into(),
                        message: format!(
                            "link '{}' references missing entity '{}'",
                            link.id, endpoint
                        ),
                        entity_type: Some(EntityKind::Link),
                        id: Some(link.id.clone()),
                    });
                }
            }
        }

        // Phase parent cycles (should never happen).
        for phase in &phases {
            if has_parent_cycle(phase, &phases) {
                findings.push(ValidationFinding {
                    severity: Severity::Error,
                    category: "phase-cycle".into(),
                    message: format!("phase '{}' is part of a parent cycle", phase.title),
                    entity_type: Some(EntityKind::Phase),
                    id: Some(phase.core.id.clone()),
                });
            }
        }

        // depends_on cycles (should never happen).
        if let Some(cycle_node) = find_dependency_cycle(&links) {
            findings.push(ValidationFinding {
                severity: Severity::Error,
                category: "dependency-cycle".into(),
                message: format!("depends_on cycle detected through '{}'", cycle_node),
                entity_type: Some(EntityKind::Link),
                id: None,
            });
        }

        if level == ValidationLevel::Strict {
            for requirement in &requirements {
                push_invalid(&mut findings, requirement.validate(), EntityKind::Requirement, requirement.id());
            }
            for solution in &solutions {
                push_invalid(&mut findings, solution.validate(), EntityKind::Solution, solution.id());
            }
            for phase in &phases {
                push_invalid(&mut findings, phase.validate(), EntityKind::Phase, phase.id());
            }
            for artifact in &artifacts {
                push_invalid(&mut findings, artifact.validate(), EntityKind::Artifact, artifact.id());
            }

            let mut slugs: HashSet<&str> = HashSet::new();
            for artifact in &artifacts {
                if !slugs.insert(artifact.slug.as_str()) {
                    findings.push(ValidationFinding {
                        severity: Severity::Error,
                        category: "duplicate-slug".into(),
                        message: format!("artifact slug '{}' is duplicated", artifact.slug),
                        entity_type: Some(EntityKind::Artifact),
                        id: Some(artifact.core.id.clone()),
                    });
                }
            }
        }

        let ok = !findings.iter().any(|f| f.severity == Severity::Error);
        Ok(ValidationReport {
            level,
            findings,
            ok,
        })
    }

    // ------------------------------------------------------------------
    // export
    // ------------------------------------------------------------------

    pub async fn export(
        &self,
        format: ExportFormat,
        sections: Option<&[EntityKind]>,
    ) -> Result<ExportResult> {
        self.ctx.ensure_writable()?;
        let include = |kind: EntityKind| {
            sections.map(|kinds| kinds.contains(&kind)).unwrap_or(true)
        };
        let manifest = self.ctx.manifest().await?;

        let requirements = if include(EntityKind::Requirement) {
            self.ctx.inner.requirements.find_all().await?
        } else {
            Vec::new()
        };
        let solutions = if include(EntityKind::Solution) {
            self.ctx.inner.solutions.find_all().await?
        } else {
            Vec::new()
        };
        let decisions = if include(EntityKind::Decision) {
            self.ctx.inner.decisions.find_all().await?
        } else {
            Vec::new()
        };
        let phases = if include(EntityKind::Phase) {
            let mut phases = self.ctx.inner.phases.find_all().await?;
            phases.sort_by(|a, b| a.path.cmp(&b.path));
            phases
        } else {
            Vec::new()
        };
        let artifacts = if include(EntityKind::Artifact) {
            self.ctx.inner.artifacts.find_all().await?
        } else {
            Vec::new()
        };
        let links = if include(EntityKind::Link) {
            self.ctx.inner.links.find_all_links(None).await?
        } else {
            Vec::new()
        };

        let (content, extension) = match format {
            ExportFormat::Json => {
                let doc = json!({
                    "plan": manifest,
                    "requirements": requirements,
                    "solutions": solutions,
                    "decisions": decisions,
                    "phases": phases,
                    "artifacts": artifacts,
                    "links": links,
                });
                (serde_json::to_string_pretty(&doc)? + "\n", "json")
            }
            ExportFormat::Markdown => (
                render_markdown(
                    &manifest.name.clone().unwrap_or_else(|| manifest.id.clone()),
                    &requirements,
                    &solutions,
                    &decisions,
                    &phases,
                    &artifacts,
                    &links,
                ),
                "md",
            ),
        };

        let path = self
            .ctx
            .inner
            .paths
            .exports_dir()
            .join(format!("export-{}.{}", Utc::now().format("%Y%m%dT%H%M%S"), extension));
        atomic_write_text(&path, &content).await?;
        Ok(ExportResult {
            format,
            path,
            content,
        })
    }

    // ------------------------------------------------------------------
    // health
    // ------------------------------------------------------------------

    pub async fn health(&self) -> Result<HealthReport> {
        let manifest = self.ctx.manifest().await?;
        let statistics = self.ctx.compute_statistics().await?;
        Ok(HealthReport {
            project_id: self.ctx.project_id().to_string(),
            plan_id: self.ctx.plan_id().to_string(),
            statistics,
            total_links: self.ctx.inner.links.count().await,
            history_enabled: manifest.enable_history,
        })
    }
}

fn hit(entity_type: EntityKind, id: &str, title: Option<&str>) -> SearchHit {
    SearchHit {
        entity_type,
        id: id.to_string(),
        title: title.map(str::to_string),
    }
}

fn push_invalid(
    findings: &mut Vec<ValidationFinding>,
    result: Result<()>,
    entity_type: EntityKind,
    id: &str,
) {
    if let Err(e) = result {
        findings.push(ValidationFinding {
            severity: Severity::Error,
            category: "missing-required-field".into(),
            message: e.to_string(),
            entity_type: Some(entity_type),
            id: Some(id.to_string()),
        });
    }
}

fn has_parent_cycle(phase: &Phase, all: &[Phase]) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = phase.parent_id.as_deref();
    seen.insert(phase.core.id.as_str());
    while let Some(parent_id) = current {
        if !seen.insert(parent_id) {
            return true;
        }
        current = all
            .iter()
            .find(|p| p.core.id == parent_id)
            .and_then(|p| p.parent_id.as_deref());
    }
    false
}

/// Kahn-style check: a `depends_on` edge set with no topological order has
/// a cycle; returns one node involved.
fn find_dependency_cycle(links: &[Link]) -> Option<String> {
    use std::collections::HashMap;
    let depends: Vec<&Link> = links
        .iter()
        .filter(|l| l.relation_type == RelationType::DependsOn)
        .collect();
    if depends.is_empty() {
        return None;
    }
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for link in &depends {
        indegree.entry(link.source_id.as_str()).or_insert(0);
        *indegree.entry(link.target_id.as_str()).or_insert(0) += 1;
        edges
            .entry(link.source_id.as_str())
            .or_default()
            .push(link.target_id.as_str());
    }
    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut remaining = indegree.len();
    while let Some(node) = queue.pop() {
        remaining -= 1;
        for next in edges.get(node).into_iter().flatten() {
            let degree = indegree.get_mut(next).expect("edge target has an indegree");
            *degree -= 1;
            if *degree == 0 {
                queue.push(next);
            }
        }
    }
    if remaining == 0 {
        None
    } else {
        indegree
            .iter()
            .filter(|(_, d)| **d > 0)
            .map(|(n, _)| n.to_string())
            .next()
    }
}

fn render_markdown(
    plan_name: &str,
    requirements: &[Requirement],
    solutions: &[Solution],
    decisions: &[Decision],
    phases: &[Phase],
    artifacts: &[Artifact],
    links: &[Link],
) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "# Plan: {}\n", plan_name);

    if !requirements.is_empty() {
        let _ = writeln!(out, "## Requirements\n");
        for r in requirements {
            let _ = writeln!(
                out,
                "- **{}** (`{}`, {:?} priority, {} votes): {}",
                r.title,
                r.core.id,
                r.priority,
                r.votes,
                r.description
            );
        }
        let _ = writeln!(out);
    }
    if !solutions.is_empty() {
        let _ = writeln!(out, "## Solutions\n");
        for s in solutions {
            let _ = writeln!(
                out,
                "- **{}** (`{}`, {:?}): {}",
                s.title, s.core.id, s.status, s.description
            );
        }
        let _ = writeln!(out);
    }
    if !decisions.is_empty() {
        let _ = writeln!(out, "## Decisions\n");
        for d in decisions {
            let _ = writeln!(out, "- **{}** (`{}`, {:?}): {}", d.title, d.core.id, d.status, d.decision);
        }
        let _ = writeln!(out);
    }
    if !phases.is_empty() {
        let _ = writeln!(out, "## Phases\n");
        for p in phases {
            let indent = "  ".repeat(p.depth as usize);
            let _ = writeln!(
                out,
                "{}- [{}] **{}** ({}%, path {})",
                indent,
                match p.status {
                    crate::model::PhaseStatus::Completed => "x",
                    _ => " ",
                },
                p.title,
                p.progress,
                p.path
            );
        }
        let _ = writeln!(out);
    }
    if !artifacts.is_empty() {
        let _ = writeln!(out, "## Artifacts\n");
        for a in artifacts {
            let _ = writeln!(out, "- **{}** (`{}`): {}", a.title, a.slug, a.description);
        }
        let _ = writeln!(out);
    }
    if !links.is_empty() {
        let _ = writeln!(out, "## Links\n");
        for l in links {
            let _ = writeln!(out, "- `{}` -[{}]-> `{}`", l.source_id, l.relation_type, l.target_id);
        }
        let _ = writeln!(out);
    }
    out
}

async fn atomic_write_text(path: &std::path::Path, content: &str) -> Result<()> {
    // Exports are not JSON documents; reuse only the temp+rename discipline.
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, content).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(StoreError::internal(format!(
            "failed to write export {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}
