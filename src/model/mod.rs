//! Domain model: the planning entities, their drafts and patches, and the
//! base contract every persisted record satisfies.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{Result, StoreError, ValidationIssue};

mod artifact;
mod decision;
mod link;
mod manifest;
mod phase;
mod project;
mod requirement;
mod solution;

pub use artifact::{
    Artifact, ArtifactContent, ArtifactDraft, ArtifactPatch, ArtifactTarget, TargetAction,
    MAX_SLUG_LEN,
};
pub use decision::{Alternative, Decision, DecisionDraft, DecisionPatch, DecisionStatus};
pub use link::{Link, LinkDraft, RelationType};
pub use manifest::{PlanManifest, PlanPatch, PlanStatistics, PlanStatus};
pub use phase::{validate_order, Phase, PhaseDraft, PhasePatch, PhaseStatus, MAX_ORDER};
pub use project::{validate_project_id, ProjectConfig};
pub use requirement::{
    Requirement, RequirementCategory, RequirementDraft, RequirementPatch, RequirementSource,
    RequirementStatus, SourceType,
};
pub use solution::{
    EffortEstimate, Evaluation, Solution, SolutionDraft, SolutionPatch, SolutionStatus, Tradeoff,
};

// ============================================================================
// Entity kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Requirement,
    Solution,
    Decision,
    Phase,
    Artifact,
    Link,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Solution => "solution",
            Self::Decision => "decision",
            Self::Phase => "phase",
            Self::Artifact => "artifact",
            Self::Link => "link",
        }
    }

    /// The five file-backed entity kinds, excluding link edges.
    pub fn entities() -> [EntityKind; 5] {
        [
            Self::Requirement,
            Self::Solution,
            Self::Decision,
            Self::Phase,
            Self::Artifact,
        ]
    }

    pub fn parse(tag: &str) -> Option<EntityKind> {
        match tag {
            "requirement" => Some(Self::Requirement),
            "solution" => Some(Self::Solution),
            "decision" => Some(Self::Decision),
            "phase" => Some(Self::Phase),
            "artifact" => Some(Self::Artifact),
            "link" => Some(Self::Link),
            _ => None,
        }
    }

    /// Field names exposed by the `list_fields` action for this kind.
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            Self::Requirement => requirement::FIELDS,
            Self::Solution => solution::FIELDS,
            Self::Decision => decision::FIELDS,
            Self::Phase => phase::FIELDS,
            Self::Artifact => artifact::FIELDS,
            Self::Link => link::FIELDS,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shared value types
// ============================================================================

/// Semantic priority shared by requirements and phases. Sorting uses the
/// explicit rank, not the lexical order of the labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

// ============================================================================
// Shared metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub created_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl EntityMetadata {
    pub fn created_by(author: impl Into<String>) -> Self {
        Self {
            created_by: author.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self, issues: &mut Vec<ValidationIssue>) {
        for (i, tag) in self.tags.iter().enumerate() {
            if tag.key.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("metadata.tags[{}].key", i),
                    "tag key must not be empty",
                ));
            }
        }
    }
}

/// Base fields shared by every plan entity, flattened into the entity's
/// JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCore {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default)]
    pub metadata: EntityMetadata,
}

impl EntityCore {
    pub fn new(kind: EntityKind, metadata: EntityMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            created_at: now,
            updated_at: now,
            version: 1,
            metadata,
        }
    }
}

// ============================================================================
// Record contract
// ============================================================================

/// Contract every file-backed entity satisfies. The generic repository only
/// sees this surface.
pub trait PlanRecord:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    const KIND: EntityKind;

    fn core(&self) -> &EntityCore;
    fn core_mut(&mut self) -> &mut EntityCore;

    fn id(&self) -> &str {
        &self.core().id
    }

    fn version(&self) -> u64 {
        self.core().version
    }

    fn set_version(&mut self, version: u64) {
        self.core_mut().version = version;
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.core().updated_at
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.core_mut().updated_at = at;
    }

    /// Kind-specific invariants, checked on create and after patch merge.
    fn validate(&self) -> Result<()>;

    /// Base invariants common to all kinds.
    fn validate_base(&self) -> Result<()> {
        let mut issues = Vec::new();
        let core = self.core();
        if core.id.trim().is_empty() {
            issues.push(ValidationIssue::new("id", "id must not be empty"));
        }
        if core.kind != Self::KIND {
            issues.push(ValidationIssue::with_value(
                "type",
                format!("type tag must be '{}'", Self::KIND),
                Value::String(core.kind.as_str().to_string()),
            ));
        }
        if core.version == 0 {
            issues.push(ValidationIssue::new("version", "version must be >= 1"));
        }
        core.metadata.validate(&mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(issues))
        }
    }
}

// ============================================================================
// Patch helpers
// ============================================================================

/// Serialize a typed patch into the flat JSON object the repository merges.
/// Fields left `None` are skipped entirely, so only supplied fields change.
pub fn patch_to_map<T: Serialize>(patch: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(patch)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::internal(format!(
            "patch must serialize to an object, got {}",
            other
        ))),
    }
}

pub(crate) fn non_empty(field: &str, value: &str, issues: &mut Vec<ValidationIssue>) {
    if value.trim().is_empty() {
        issues.push(ValidationIssue::new(
            field,
            format!("{} must not be empty", field),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_round_trips_through_serde() {
        for kind in EntityKind::entities() {
            let json = serde_json::to_string(&kind).unwrap();
            let back: EntityKind = serde_json::from_str(&json).unwrap();
            assert_eq!(kind, back);
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn entity_core_starts_at_version_one() {
        let core = EntityCore::new(EntityKind::Requirement, EntityMetadata::default());
        assert_eq!(core.version, 1);
        assert_eq!(core.created_at, core.updated_at);
        assert!(!core.id.is_empty());
    }
}
