//! Atomic multi-operation batches. Operations are creations tagged by
//! entity type; later operations may reference entities created earlier in
//! the batch through `$0, $1, …` temp ids. On any failure everything
//! created so far is deleted in reverse order, and whatever could not be
//! reverted is reported inside the error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::PlanContext;
use super::{
    ArtifactService, DecisionService, LinkingService, PhaseService, RequirementService,
    SolutionService,
};
use crate::core::{BatchFailure, Result, StoreError};
use crate::model::EntityKind;

/// Fields (dotted paths) that may carry temp-id references.
const ID_FIELDS: &[&str] = &[
    "parentId",
    "addressing",
    "sourceId",
    "targetId",
    "relatedPhaseId",
    "relatedSolutionId",
    "relatedRequirementIds",
    "source.parentId",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub entity_type: EntityKind,
    /// Handle later operations use to reference this one's created id.
    #[serde(default)]
    pub temp_id: Option<String>,
    /// The draft payload for the entity type.
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreated {
    pub entity_type: EntityKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub created: Vec<BatchCreated>,
}

#[derive(Clone)]
pub struct BatchExecutor {
    ctx: PlanContext,
}

impl BatchExecutor {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, operations: Vec<BatchOperation>) -> Result<BatchOutcome> {
        self.ctx.ensure_writable()?;
        let mut temp_ids: HashMap<String, String> = HashMap::new();
        let mut created: Vec<BatchCreated> = Vec::new();

        for (index, operation) in operations.into_iter().enumerate() {
            let mut payload = operation.payload;
            resolve_temp_ids(&mut payload, &temp_ids);

            match self.execute_one(operation.entity_type, payload).await {
                Ok(id) => {
                    if let Some(temp_id) = &operation.temp_id {
                        temp_ids.insert(temp_id.clone(), id.clone());
                    }
                    created.push(BatchCreated {
                        entity_type: operation.entity_type,
                        id,
                        temp_id: operation.temp_id,
                    });
                }
                Err(e) => {
                    let unreverted = self.rollback(&created).await;
                    if let Err(stats_err) = self.ctx.refresh_statistics().await {
                        tracing::warn!(error = %stats_err, "failed to refresh statistics after rollback");
                    }
                    return Err(StoreError::Batch {
                        message: format!(
                            "operation {} ({}) failed: {}",
                            index, operation.entity_type, e
                        ),
                        failures: vec![BatchFailure {
                            index,
                            entity_type: operation.entity_type.as_str().to_string(),
                            message: e.to_string(),
                            unreverted,
                        }],
                    });
                }
            }
        }

        self.ctx.refresh_statistics().await?;
        Ok(BatchOutcome { created })
    }

    async fn execute_one(&self, entity_type: EntityKind, payload: Value) -> Result<String> {
        let ctx = self.ctx.clone();
        match entity_type {
            EntityKind::Requirement => {
                let draft = serde_json::from_value(payload)
                    .map_err(|e| StoreError::validation("payload", e.to_string()))?;
                Ok(RequirementService::new(ctx).add(draft).await?.core.id)
            }
            EntityKind::Solution => {
                let draft = serde_json::from_value(payload)
                    .map_err(|e| StoreError::validation("payload", e.to_string()))?;
                Ok(SolutionService::new(ctx).propose(draft).await?.core.id)
            }
            EntityKind::Decision => {
                let draft = serde_json::from_value(payload)
                    .map_err(|e| StoreError::validation("payload", e.to_string()))?;
                Ok(DecisionService::new(ctx).record(draft).await?.core.id)
            }
            EntityKind::Phase => {
                let draft = serde_json::from_value(payload)
                    .map_err(|e| StoreError::validation("payload", e.to_string()))?;
                Ok(PhaseService::new(ctx).add(draft).await?.core.id)
            }
            EntityKind::Artifact => {
                let draft = serde_json::from_value(payload)
                    .map_err(|e| StoreError::validation("payload", e.to_string()))?;
                Ok(ArtifactService::new(ctx).add(draft).await?.core.id)
            }
            EntityKind::Link => {
                let draft = serde_json::from_value(payload)
                    .map_err(|e| StoreError::validation("payload", e.to_string()))?;
                Ok(LinkingService::new(ctx).create(draft).await?.id)
            }
        }
    }

    /// Delete in reverse creation order; ids that resist deletion are
    /// returned for the error report.
    async fn rollback(&self, created: &[BatchCreated]) -> Vec<String> {
        let mut unreverted = Vec::new();
        for entry in created.iter().rev() {
            let result = match entry.entity_type {
                EntityKind::Requirement => self.ctx.inner.requirements.delete(&entry.id).await,
                EntityKind::Solution => self.ctx.inner.solutions.delete(&entry.id).await,
                EntityKind::Decision => self.ctx.inner.decisions.delete(&entry.id).await,
                EntityKind::Phase => self.ctx.inner.phases.delete(&entry.id).await,
                EntityKind::Artifact => self.ctx.inner.artifacts.delete(&entry.id).await,
                EntityKind::Link => self.ctx.inner.links.delete_link(&entry.id).await,
            };
            if let Err(e) = result {
                tracing::warn!(id = %entry.id, error = %e, "batch rollback failed to delete");
                unreverted.push(entry.id.clone());
            }
        }
        unreverted
    }
}

/// Replace `$N` placeholders in the known id-carrying fields with the real
/// ids produced earlier in the batch. Unknown placeholders are left as-is
/// and will fail referential validation downstream.
fn resolve_temp_ids(payload: &mut Value, temp_ids: &HashMap<String, String>) {
    if temp_ids.is_empty() {
        return;
    }
    for field in ID_FIELDS {
        resolve_path(payload, field, temp_ids);
    }
}

fn resolve_path(payload: &mut Value, path: &str, temp_ids: &HashMap<String, String>) {
    let Some((head, rest)) = split_head(path) else {
        return;
    };
    let Some(object) = payload.as_object_mut() else {
        return;
    };
    let Some(slot) = object.get_mut(head) else {
        return;
    };
    match rest {
        Some(rest) => resolve_path(slot, rest, temp_ids),
        None => substitute(slot, temp_ids),
    }
}

fn split_head(path: &str) -> Option<(&str, Option<&str>)> {
    if path.is_empty() {
        return None;
    }
    match path.split_once('.') {
        Some((head, rest)) => Some((head, Some(rest))),
        None => Some((path, None)),
    }
}

fn substitute(slot: &mut Value, temp_ids: &HashMap<String, String>) {
    match slot {
        Value::String(s) => {
            if let Some(real) = temp_ids.get(s.as_str()) {
                *s = real.clone();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, temp_ids);
            }
        }
        _ => {}
    }
}
