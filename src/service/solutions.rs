//! Solution actions: propose, compare, select (with demotion of competing
//! selections), bulk update.

use serde::{Deserialize, Serialize};

use super::context::PlanContext;
use crate::core::{BatchFailure, Result, StoreError};
use crate::model::{
    patch_to_map, Alternative, Decision, DecisionDraft, EntityKind, PlanRecord, Solution,
    SolutionDraft, SolutionPatch, SolutionStatus,
};
use crate::query::{QueryOptions, QueryPage};
use crate::storage::{EntityHistory, FieldChange};

pub const GET_MANY_LIMIT: usize = 100;

/// One cell of the comparison matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectEntry {
    pub solution_id: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectRow {
    pub aspect: String,
    pub entries: Vec<AspectEntry>,
    /// Solution with the highest score for this aspect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonMatrix {
    pub aspects: Vec<AspectRow>,
    /// Solution with the highest mean score across aspects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_winner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionOutcome {
    pub selected: Solution,
    /// Competing solutions demoted to `rejected`.
    pub demoted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

#[derive(Clone)]
pub struct SolutionService {
    ctx: PlanContext,
}

impl SolutionService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    /// Every id in `addressing` must be an existing requirement.
    pub async fn propose(&self, draft: SolutionDraft) -> Result<Solution> {
        self.ctx.ensure_writable()?;
        for requirement_id in &draft.addressing {
            if !self.ctx.inner.requirements.exists(requirement_id).await? {
                return Err(StoreError::Integrity(format!(
                    "addressing references missing requirement '{}'",
                    requirement_id
                )));
            }
        }
        let solution = draft.into_solution()?;
        let created = self.ctx.inner.solutions.create(solution).await?;
        self.ctx.refresh_statistics().await?;
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Solution> {
        self.ctx.inner.solutions.find_by_id(id).await
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Solution>> {
        if ids.len() > GET_MANY_LIMIT {
            return Err(StoreError::too_many_ids(GET_MANY_LIMIT));
        }
        self.ctx.inner.solutions.find_by_ids(ids).await
    }

    pub async fn update(&self, id: &str, patch: SolutionPatch) -> Result<Solution> {
        self.ctx.ensure_writable()?;
        if let Some(addressing) = &patch.addressing {
            for requirement_id in addressing {
                if !self.ctx.inner.requirements.exists(requirement_id).await? {
                    return Err(StoreError::Integrity(format!(
                        "addressing references missing requirement '{}'",
                        requirement_id
                    )));
                }
            }
        }
        let current = self.ctx.inner.solutions.find_by_id(id).await?;
        self.ctx.record_history(&current, None).await?;
        let expected = patch.version;
        let map = patch_to_map(&patch)?;
        self.ctx.inner.solutions.update(id, map, expected).await
    }

    pub async fn list(&self, options: QueryOptions) -> Result<QueryPage<Solution>> {
        self.ctx.inner.solutions.query(&options).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ctx.ensure_writable()?;
        self.ctx.inner.solutions.delete(id).await?;
        self.ctx.inner.links.delete_links_for_entity(id).await?;
        self.ctx.refresh_statistics().await?;
        Ok(())
    }

    /// Build the aspect × solution matrix. Aspects default to the union of
    /// every tradeoff aspect found on the compared solutions.
    pub async fn compare(
        &self,
        solution_ids: &[String],
        aspects: Option<Vec<String>>,
    ) -> Result<ComparisonMatrix> {
        let mut solutions = Vec::with_capacity(solution_ids.len());
        for id in solution_ids {
            solutions.push(self.ctx.inner.solutions.find_by_id(id).await?);
        }

        let aspects = aspects.unwrap_or_else(|| {
            let mut seen = Vec::new();
            for solution in &solutions {
                for tradeoff in &solution.tradeoffs {
                    if !seen.contains(&tradeoff.aspect) {
                        seen.push(tradeoff.aspect.clone());
                    }
                }
            }
            seen
        });

        let mut rows = Vec::with_capacity(aspects.len());
        for aspect in &aspects {
            let mut entries = Vec::with_capacity(solutions.len());
            for solution in &solutions {
                let tradeoff = solution.tradeoffs.iter().find(|t| &t.aspect == aspect);
                entries.push(AspectEntry {
                    solution_id: solution.id().to_string(),
                    pros: tradeoff.map(|t| t.pros.clone()).unwrap_or_default(),
                    cons: tradeoff.map(|t| t.cons.clone()).unwrap_or_default(),
                    score: tradeoff.and_then(|t| t.score),
                });
            }
            let winner = entries
                .iter()
                .filter_map(|e| e.score.map(|s| (e.solution_id.clone(), s)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id);
            rows.push(AspectRow {
                aspect: aspect.clone(),
                entries,
                winner,
            });
        }

        let overall_winner = solutions
            .iter()
            .filter_map(|solution| {
                let scores: Vec<f64> =
                    solution.tradeoffs.iter().filter_map(|t| t.score).collect();
                if scores.is_empty() {
                    return None;
                }
                let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                Some((solution.id().to_string(), mean))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);

        Ok(ComparisonMatrix {
            aspects: rows,
            overall_winner,
        })
    }

    /// Select a solution. Any other `selected` solution sharing one of its
    /// addressed requirements is demoted to `rejected`; optionally a
    /// decision record documenting the choice is created.
    pub async fn select(
        &self,
        id: &str,
        reason: impl Into<String>,
        create_decision_record: bool,
    ) -> Result<SelectionOutcome> {
        self.ctx.ensure_writable()?;
        let reason = reason.into();
        let candidate = self.ctx.inner.solutions.find_by_id(id).await?;

        // Demote competitors before promoting, so no two selected solutions
        // ever share a requirement.
        let mut demoted = Vec::new();
        for other in self.ctx.inner.solutions.find_all().await? {
            if other.id() == id || other.status != SolutionStatus::Selected {
                continue;
            }
            let competes = other
                .addressing
                .iter()
                .any(|requirement| candidate.addressing.contains(requirement));
            if !competes {
                continue;
            }
            self.ctx.record_history(&other, Some("deselected".into())).await?;
            self.ctx
                .inner
                .solutions
                .mutate(other.id(), None, |solution| {
                    solution.status = SolutionStatus::Rejected;
                    Ok(())
                })
                .await?;
            demoted.push(other.id().to_string());
        }

        self.ctx.record_history(&candidate, Some("selected".into())).await?;
        let selected = self
            .ctx
            .inner
            .solutions
            .mutate(id, None, |solution| {
                solution.status = SolutionStatus::Selected;
                solution.selection_reason = Some(reason.clone());
                Ok(())
            })
            .await?;

        let decision = if create_decision_record {
            let mut demoted_solutions = Vec::new();
            for demoted_id in &demoted {
                if let Some(solution) =
                    self.ctx.inner.solutions.find_by_id_opt(demoted_id).await?
                {
                    demoted_solutions.push(solution);
                }
            }
            Some(self.record_selection_decision(&selected, &reason, &demoted_solutions).await?)
        } else {
            None
        };

        Ok(SelectionOutcome {
            selected,
            demoted,
            decision,
        })
    }

    async fn record_selection_decision(
        &self,
        selected: &Solution,
        reason: &str,
        demoted: &[Solution],
    ) -> Result<Decision> {
        let mut draft = DecisionDraft::new(
            format!("Selected solution: {}", selected.title),
            format!(
                "Which solution should address {}?",
                if selected.addressing.is_empty() {
                    "the open requirements".to_string()
                } else {
                    format!("requirements [{}]", selected.addressing.join(", "))
                }
            ),
            format!("{}: {}", selected.approach, reason),
        );
        draft.context = selected.description.clone();
        draft.alternatives_considered = demoted
            .iter()
            .map(|solution| Alternative {
                option: solution.title.clone(),
                reasoning: Some(solution.approach.clone()),
                why_not_chosen: Some(format!("deselected in favor of '{}'", selected.title)),
            })
            .collect();
        draft.created_by = Some(selected.core.metadata.created_by.clone());
        let decision = draft.into_decision()?;
        let created = self.ctx.inner.decisions.create(decision).await?;
        self.ctx.refresh_statistics().await?;
        Ok(created)
    }

    /// Apply many patches. With `atomic`, every target is pre-validated
    /// (existence and version) before the first write, so the common
    /// failure modes cannot leave a partial batch; without it, failures are
    /// collected and reported while the rest proceed.
    pub async fn bulk_update(
        &self,
        updates: Vec<(String, SolutionPatch)>,
        atomic: bool,
    ) -> Result<Vec<Solution>> {
        self.ctx.ensure_writable()?;
        if atomic {
            for (id, patch) in &updates {
                let current = self.ctx.inner.solutions.find_by_id(id).await?;
                if let Some(expected) = patch.version {
                    if expected != current.version() {
                        return Err(StoreError::VersionConflict {
                            entity_type: EntityKind::Solution.as_str().to_string(),
                            id: id.clone(),
                            expected,
                            actual: current.version(),
                        });
                    }
                }
            }
        }

        let mut updated = Vec::with_capacity(updates.len());
        let mut failures = Vec::new();
        for (index, (id, patch)) in updates.into_iter().enumerate() {
            match self.update(&id, patch).await {
                Ok(solution) => updated.push(solution),
                Err(e) if atomic => return Err(e),
                Err(e) => failures.push(BatchFailure {
                    index,
                    entity_type: EntityKind::Solution.as_str().to_string(),
                    message: e.to_string(),
                    unreverted: Vec::new(),
                }),
            }
        }
        if failures.is_empty() {
            Ok(updated)
        } else {
            Err(StoreError::Batch {
                message: format!("{} of the updates failed", failures.len()),
                failures,
            })
        }
    }

    pub async fn get_history(&self, id: &str) -> Result<EntityHistory> {
        self.ctx.entity_history(EntityKind::Solution, id).await
    }

    pub async fn diff(&self, id: &str, v1: u64, v2: u64) -> Result<Vec<FieldChange>> {
        self.ctx.entity_diff(EntityKind::Solution, id, v1, v2).await
    }

    pub fn list_fields(&self) -> &'static [&'static str] {
        EntityKind::Solution.field_names()
    }
}
