use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{non_empty, EntityCore, EntityKind, EntityMetadata, PlanRecord, Tag};
use crate::core::{Result, StoreError, ValidationIssue};

pub(super) const FIELDS: &[&str] = &[
    "id",
    "type",
    "title",
    "description",
    "slug",
    "artifactType",
    "status",
    "content",
    "targets",
    "relatedPhaseId",
    "relatedSolutionId",
    "relatedRequirementIds",
    "codeRefs",
    "createdAt",
    "updatedAt",
    "version",
    "metadata",
];

pub const MAX_SLUG_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAction {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactTarget {
    pub path: String,
    pub action: TargetAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(flatten)]
    pub core: EntityCore,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Kebab-case identifier, unique within a plan.
    pub slug: String,
    pub artifact_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub content: ArtifactContent,
    #[serde(default)]
    pub targets: Vec<ArtifactTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_solution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_requirement_ids: Option<Vec<String>>,
    /// `file:line` references into the codebase.
    #[serde(default)]
    pub code_refs: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Artifact {
    /// Older plans stored targets under a `fileTable` field. Fold it into
    /// `targets` the first time the artifact is read.
    pub fn migrate_legacy_fields(&mut self) -> bool {
        let Some(raw) = self.extra.remove("fileTable") else {
            return false;
        };
        if self.targets.is_empty() {
            if let Ok(targets) = serde_json::from_value::<Vec<ArtifactTarget>>(raw) {
                self.targets = targets;
            }
        }
        true
    }
}

impl PlanRecord for Artifact {
    const KIND: EntityKind = EntityKind::Artifact;

    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        non_empty("title", &self.title, &mut issues);
        non_empty("artifactType", &self.artifact_type, &mut issues);
        if self.slug.is_empty() || self.slug.len() > MAX_SLUG_LEN {
            issues.push(ValidationIssue::with_value(
                "slug",
                format!("slug must be 1..={} characters", MAX_SLUG_LEN),
                Value::String(self.slug.clone()),
            ));
        } else if !self
            .slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || self.slug.starts_with('-')
            || self.slug.ends_with('-')
        {
            issues.push(ValidationIssue::with_value(
                "slug",
                "slug must be kebab-case: lowercase alphanumerics joined by dashes",
                Value::String(self.slug.clone()),
            ));
        }
        for (i, target) in self.targets.iter().enumerate() {
            if target.path.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("targets[{}].path", i),
                    "target path must not be empty",
                ));
            }
            if let (Some(start), Some(end)) = (target.line_number, target.line_end) {
                if end < start {
                    issues.push(ValidationIssue::new(
                        format!("targets[{}].lineEnd", i),
                        "lineEnd must not precede lineNumber",
                    ));
                }
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
pub struct ArtifactDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Derived from the title when absent.
    #[serde(default)]
    pub slug: Option<String>,
    pub artifact_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub content: Option<ArtifactContent>,
    #[serde(default)]
    pub targets: Vec<ArtifactTarget>,
    #[serde(default)]
    pub related_phase_id: Option<String>,
    #[serde(default)]
    pub related_solution_id: Option<String>,
    #[serde(default)]
    pub related_requirement_ids: Option<Vec<String>>,
    #[serde(default)]
    pub code_refs: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl ArtifactDraft {
    pub fn new(title: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artifact_type: artifact_type.into(),
            ..Self::default()
        }
    }

    /// `slug` must already be resolved (explicit or generated).
    pub fn into_artifact(self, slug: String) -> Result<Artifact> {
        let mut metadata = EntityMetadata::created_by(self.created_by.unwrap_or_default());
        metadata.tags = self.tags;
        let artifact = Artifact {
            core: EntityCore::new(EntityKind::Artifact, metadata),
            title: self.title,
            description: self.description,
            slug,
            artifact_type: self.artifact_type,
            status: self.status.unwrap_or_else(|| "draft".to_string()),
            content: self.content.unwrap_or_default(),
            targets: self.targets,
            related_phase_id: self.related_phase_id,
            related_solution_id: self.related_solution_id,
            related_requirement_ids: self.related_requirement_ids,
            code_refs: self.code_refs,
            extra: Map::new(),
        };
        artifact.validate()?;
        Ok(artifact)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ArtifactContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<ArtifactTarget>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_solution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_requirement_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_file_table_migrates_into_targets() {
        let json = r#"{
            "id": "a1", "type": "artifact",
            "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z",
            "version": 1,
            "title": "Patch", "slug": "patch", "artifactType": "code",
            "fileTable": [{"path": "src/main.rs", "action": "modify"}]
        }"#;
        let mut artifact: Artifact = serde_json::from_str(json).unwrap();
        assert!(artifact.targets.is_empty());
        assert!(artifact.migrate_legacy_fields());
        assert_eq!(artifact.targets.len(), 1);
        assert_eq!(artifact.targets[0].path, "src/main.rs");
        assert!(!artifact.extra.contains_key("fileTable"));
    }

    #[test]
    fn bad_slug_is_rejected() {
        let draft = ArtifactDraft::new("Title", "code");
        let err = draft.into_artifact("Not A Slug".into()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
