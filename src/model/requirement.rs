use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    non_empty, EntityCore, EntityKind, EntityMetadata, PlanRecord, Priority, Tag,
};
use crate::core::{Result, StoreError};

pub(super) const FIELDS: &[&str] = &[
    "id",
    "type",
    "title",
    "description",
    "rationale",
    "priority",
    "category",
    "status",
    "votes",
    "source",
    "acceptanceCriteria",
    "createdAt",
    "updatedAt",
    "version",
    "metadata",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequirementCategory {
    Functional,
    NonFunctional,
    Technical,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementStatus {
    Proposed,
    Approved,
    Implemented,
    Obsolete,
}

impl Default for RequirementStatus {
    fn default() -> Self {
        Self::Proposed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    UserRequest,
    Discovered,
    Derived,
}

/// Where a requirement came from. `parent_id` points at the requirement it
/// was derived from, when applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementSource {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Default for RequirementSource {
    fn default() -> Self {
        Self {
            source_type: SourceType::UserRequest,
            context: None,
            parent_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    #[serde(flatten)]
    pub core: EntityCore,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub category: RequirementCategory,
    #[serde(default)]
    pub status: RequirementStatus,
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub source: RequirementSource,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanRecord for Requirement {
    const KIND: EntityKind = EntityKind::Requirement;

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        non_empty("title", &self.title, &mut issues);
        non_empty("description", &self.description, &mut issues);
        if let Some(parent_id) = &self.source.parent_id {
            if parent_id.trim().is_empty() {
                issues.push(crate::core::ValidationIssue::new(
                    "source.parentId",
                    "source.parentId must not be empty when present",
                ));
            }
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
pub struct RequirementDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub category: Option<RequirementCategory>,
    #[serde(default)]
    pub status: Option<RequirementStatus>,
    #[serde(default)]
    pub source: Option<RequirementSource>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl RequirementDraft {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn into_requirement(self) -> Result<Requirement> {
        let mut metadata = EntityMetadata::created_by(self.created_by.unwrap_or_default());
        metadata.tags = self.tags;
        let requirement = Requirement {
            core: EntityCore::new(EntityKind::Requirement, metadata),
            title: self.title,
            description: self.description,
            rationale: self.rationale,
            priority: self.priority.unwrap_or_default(),
            category: self.category.unwrap_or(RequirementCategory::Functional),
            status: self.status.unwrap_or_default(),
            votes: 0,
            source: self.source.unwrap_or_default(),
            acceptance_criteria: self.acceptance_criteria,
            extra: Map::new(),
        };
        requirement.validate()?;
        Ok(requirement)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<RequirementCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequirementStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<RequirementSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<Vec<String>>,
    /// Optimistic concurrency token; checked, never merged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_produces_valid_requirement() {
        let req = RequirementDraft::new("User login", "Users can authenticate")
            .into_requirement()
            .unwrap();
        assert_eq!(req.core.version, 1);
        assert_eq!(req.votes, 0);
        assert_eq!(req.status, RequirementStatus::Proposed);
        req.validate_base().unwrap();
    }

    #[test]
    fn empty_title_is_rejected() {
        let err = RequirementDraft::new("  ", "desc").into_requirement().unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn unknown_fields_round_trip() {
        let json = r#"{
            "id": "r1", "type": "requirement",
            "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z",
            "version": 3,
            "title": "t", "description": "d", "category": "functional",
            "futureField": {"a": 1}
        }"#;
        let req: Requirement = serde_json::from_str(json).unwrap();
        assert_eq!(req.extra.get("futureField").unwrap()["a"], 1);
        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["futureField"]["a"], 1);
    }
}
