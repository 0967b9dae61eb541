use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{non_empty, EntityCore, EntityKind, EntityMetadata, PlanRecord, Tag};
use crate::core::{Result, StoreError};

pub(super) const FIELDS: &[&str] = &[
    "id",
    "type",
    "title",
    "question",
    "context",
    "decision",
    "alternativesConsidered",
    "consequences",
    "impactScope",
    "status",
    "supersedes",
    "supersededBy",
    "createdAt",
    "updatedAt",
    "version",
    "metadata",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Active,
    Superseded,
    Reversed,
}

impl Default for DecisionStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alternative {
    pub option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_not_chosen: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    #[serde(flatten)]
    pub core: EntityCore,
    pub title: String,
    pub question: String,
    pub context: String,
    pub decision: String,
    #[serde(default)]
    pub alternatives_considered: Vec<Alternative>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequences: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_scope: Option<String>,
    #[serde(default)]
    pub status: DecisionStatus,
    /// Id of the decision this one replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    /// Backpointer set on the replaced decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanRecord for Decision {
    const KIND: EntityKind = EntityKind::Decision;

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        non_empty("title", &self.title, &mut issues);
        non_empty("question", &self.question, &mut issues);
        non_empty("decision", &self.decision, &mut issues);
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
pub struct DecisionDraft {
    pub title: String,
    pub question: String,
    #[serde(default)]
    pub context: String,
    pub decision: String,
    #[serde(default)]
    pub alternatives_considered: Vec<Alternative>,
    #[serde(default)]
    pub consequences: Option<String>,
    #[serde(default)]
    pub impact_scope: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl DecisionDraft {
    pub fn new(
        title: impl Into<String>,
        question: impl Into<String>,
        decision: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            question: question.into(),
            decision: decision.into(),
            ..Self::default()
        }
    }

    pub fn into_decision(self) -> Result<Decision> {
        let mut metadata = EntityMetadata::created_by(self.created_by.unwrap_or_default());
        metadata.tags = self.tags;
        let decision = Decision {
            core: EntityCore::new(EntityKind::Decision, metadata),
            title: self.title,
            question: self.question,
            context: self.context,
            decision: self.decision,
            alternatives_considered: self.alternatives_considered,
            consequences: self.consequences,
            impact_scope: self.impact_scope,
            status: DecisionStatus::Active,
            supersedes: None,
            superseded_by: None,
            extra: Map::new(),
        };
        decision.validate()?;
        Ok(decision)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternatives_considered: Option<Vec<Alternative>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consequences: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}
