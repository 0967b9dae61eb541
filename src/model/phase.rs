use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    non_empty, Annotation, EntityCore, EntityKind, EntityMetadata, PlanRecord, Priority, Tag,
};
use super::solution::EffortEstimate;
use crate::core::{Result, StoreError, ValidationIssue};

pub(super) const FIELDS: &[&str] = &[
    "id",
    "type",
    "title",
    "description",
    "parentId",
    "order",
    "path",
    "depth",
    "objectives",
    "deliverables",
    "successCriteria",
    "status",
    "progress",
    "estimatedEffort",
    "actualEffort",
    "priority",
    "notes",
    "createdAt",
    "updatedAt",
    "version",
    "metadata",
];

/// Sibling orders live in [1, MAX_ORDER].
pub const MAX_ORDER: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Planned,
    InProgress,
    Completed,
    Blocked,
    Skipped,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::Planned
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    #[serde(flatten)]
    pub core: EntityCore,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub order: u32,
    /// Dot-joined `order` values from the root ancestor down to this phase.
    pub path: String,
    /// Number of ancestors; a root phase has depth 0.
    pub depth: u32,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub status: PhaseStatus,
    /// Percent complete, 0..=100.
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<EffortEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_effort: Option<EffortEstimate>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub notes: Vec<Annotation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Phase {
    /// Recompute `path` and `depth` from the parent's values.
    pub fn rebase(&mut self, parent: Option<(&str, u32)>) {
        match parent {
            Some((parent_path, parent_depth)) => {
                self.path = format!("{}.{}", parent_path, self.order);
                self.depth = parent_depth + 1;
            }
            None => {
                self.path = self.order.to_string();
                self.depth = 0;
            }
        }
    }
}

pub fn validate_order(order: u32) -> Result<()> {
    if order == 0 || order > MAX_ORDER {
        return Err(StoreError::Validation(vec![ValidationIssue::with_value(
            "order",
            format!("order must be an integer in [1, {}]", MAX_ORDER),
            Value::from(order),
        )]));
    }
    Ok(())
}

impl PlanRecord for Phase {
    const KIND: EntityKind = EntityKind::Phase;

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        non_empty("title", &self.title, &mut issues);
        if self.order == 0 || self.order > MAX_ORDER {
            issues.push(ValidationIssue::with_value(
                "order",
                format!("order must be an integer in [1, {}]", MAX_ORDER),
                Value::from(self.order),
            ));
        }
        if self.progress > 100 {
            issues.push(ValidationIssue::with_value(
                "progress",
                "progress must be within [0, 100]",
                Value::from(self.progress),
            ));
        }
        if self.path.is_empty() {
            issues.push(ValidationIssue::new("path", "path must not be empty"));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(issues))
        }
    }
}

// ============================================================================
// Draft & patch
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Position among siblings; assigned `max(sibling) + 1` when absent.
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub estimated_effort: Option<EffortEstimate>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl PhaseDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// `order` must already be resolved; `parent` carries the parent's
    /// path and depth when nested.
    pub fn into_phase(self, order: u32, parent: Option<(&str, u32)>) -> Result<Phase> {
        let mut metadata = EntityMetadata::created_by(self.created_by.unwrap_or_default());
        metadata.tags = self.tags;
        let mut phase = Phase {
            core: EntityCore::new(EntityKind::Phase, metadata),
            title: self.title,
            description: self.description,
            parent_id: self.parent_id,
            order,
            path: String::new(),
            depth: 0,
            objectives: self.objectives,
            deliverables: self.deliverables,
            success_criteria: self.success_criteria,
            status: PhaseStatus::Planned,
            progress: 0,
            estimated_effort: self.estimated_effort,
            actual_effort: None,
            priority: self.priority.unwrap_or_default(),
            notes: Vec::new(),
            extra: Map::new(),
        };
        phase.rebase(parent);
        phase.validate()?;
        Ok(phase)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhasePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliverables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<EffortEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}
