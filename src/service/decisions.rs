//! Decision actions: record, update, supersede. A superseded decision is
//! immutable except for its `supersededBy` backpointer; supersede chains
//! are built from ids, never owning references.

use serde::{Deserialize, Serialize};

use super::context::PlanContext;
use crate::core::{Result, StoreError};
use crate::model::{
    patch_to_map, Alternative, Decision, DecisionDraft, DecisionPatch, DecisionStatus, EntityKind,
    PlanRecord,
};
use crate::query::{QueryOptions, QueryPage};
use crate::storage::{EntityHistory, FieldChange};

pub const GET_MANY_LIMIT: usize = 100;

/// Replacement for an existing decision: either a full draft of a new one,
/// or (when `decision` holds the UUID of an existing decision) a reference
/// to the decision that should take over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupersedeSpec {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    /// Prose of the new decision, or the id of an existing one.
    pub decision: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupersedeOutcome {
    pub superseded: Decision,
    pub successor: Decision,
    /// True when the successor already existed and was reused.
    pub reused_existing: bool,
}

#[derive(Clone)]
pub struct DecisionService {
    ctx: PlanContext,
}

impl DecisionService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    pub async fn record(&self, draft: DecisionDraft) -> Result<Decision> {
        self.ctx.ensure_writable()?;
        let decision = draft.into_decision()?;
        let created = self.ctx.inner.decisions.create(decision).await?;
        self.ctx.refresh_statistics().await?;
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Decision> {
        self.ctx.inner.decisions.find_by_id(id).await
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Decision>> {
        if ids.len() > GET_MANY_LIMIT {
            return Err(StoreError::too_many_ids(GET_MANY_LIMIT));
        }
        self.ctx.inner.decisions.find_by_ids(ids).await
    }

    pub async fn update(&self, id: &str, patch: DecisionPatch) -> Result<Decision> {
        self.ctx.ensure_writable()?;
        let current = self.ctx.inner.decisions.find_by_id(id).await?;
        if current.status == DecisionStatus::Superseded {
            return Err(StoreError::Integrity(format!(
                "decision '{}' is superseded and immutable",
                id
            )));
        }
        self.ctx.record_history(&current, None).await?;
        let expected = patch.version;
        let map = patch_to_map(&patch)?;
        self.ctx.inner.decisions.update(id, map, expected).await
    }

    pub async fn list(&self, options: QueryOptions) -> Result<QueryPage<Decision>> {
        self.ctx.inner.decisions.query(&options).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ctx.ensure_writable()?;
        self.ctx.inner.decisions.delete(id).await?;
        self.ctx.inner.links.delete_links_for_entity(id).await?;
        self.ctx.refresh_statistics().await?;
        Ok(())
    }

    /// Replace a decision. Each side's version increments exactly once.
    ///
    /// When `spec.decision` holds the id of an existing decision, that
    /// decision becomes the successor and no third record is created;
    /// otherwise a fresh decision is recorded from the given fields,
    /// carrying the old decision in its alternatives.
    pub async fn supersede(
        &self,
        decision_id: &str,
        spec: SupersedeSpec,
        reason: impl Into<String>,
    ) -> Result<SupersedeOutcome> {
        self.ctx.ensure_writable()?;
        let reason = reason.into();
        let old = self.ctx.inner.decisions.find_by_id(decision_id).await?;
        if old.status == DecisionStatus::Superseded {
            return Err(StoreError::Integrity(format!(
                "decision '{}' is already superseded",
                decision_id
            )));
        }

        let existing_successor = if uuid::Uuid::parse_str(spec.decision.trim()).is_ok() {
            self.ctx
                .inner
                .decisions
                .find_by_id_opt(spec.decision.trim())
                .await?
        } else {
            None
        };

        let (successor, reused_existing) = match existing_successor {
            Some(successor) => {
                if successor.id() == decision_id {
                    return Err(StoreError::Integrity(
                        "a decision cannot supersede itself".to_string(),
                    ));
                }
                self.ctx.record_history(&successor, Some("supersedes".into())).await?;
                let old_id = decision_id.to_string();
                let updated = self
                    .ctx
                    .inner
                    .decisions
                    .mutate(successor.id(), None, |decision| {
                        decision.supersedes = Some(old_id);
                        Ok(())
                    })
                    .await?;
                (updated, true)
            }
            None => {
                let mut draft = DecisionDraft::new(
                    spec.title.unwrap_or_else(|| old.title.clone()),
                    spec.question.unwrap_or_else(|| old.question.clone()),
                    spec.decision,
                );
                draft.context = spec.context.unwrap_or_else(|| old.context.clone());
                draft.alternatives_considered = old.alternatives_considered.clone();
                draft.alternatives_considered.push(Alternative {
                    option: old.decision.clone(),
                    reasoning: Some(old.context.clone()),
                    why_not_chosen: Some(reason.clone()),
                });
                draft.created_by = Some(old.core.metadata.created_by.clone());
                let mut decision = draft.into_decision()?;
                decision.supersedes = Some(decision_id.to_string());
                let created = self.ctx.inner.decisions.create(decision).await?;
                self.ctx.refresh_statistics().await?;
                (created, false)
            }
        };

        self.ctx.record_history(&old, Some("superseded".into())).await?;
        let successor_id = successor.id().to_string();
        let superseded = self
            .ctx
            .inner
            .decisions
            .mutate(decision_id, None, |decision| {
                decision.status = DecisionStatus::Superseded;
                decision.superseded_by = Some(successor_id.clone());
                Ok(())
            })
            .await?;

        Ok(SupersedeOutcome {
            superseded,
            successor,
            reused_existing,
        })
    }

    pub async fn get_history(&self, id: &str) -> Result<EntityHistory> {
        self.ctx.entity_history(EntityKind::Decision, id).await
    }

    pub async fn diff(&self, id: &str, v1: u64, v2: u64) -> Result<Vec<FieldChange>> {
        self.ctx.entity_diff(EntityKind::Decision, id, v1, v2).await
    }

    pub fn list_fields(&self) -> &'static [&'static str] {
        EntityKind::Decision.field_names()
    }
}
