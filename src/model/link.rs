use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Result, StoreError, ValidationIssue};

pub(super) const FIELDS: &[&str] = &[
    "id",
    "sourceId",
    "targetId",
    "relationType",
    "metadata",
    "createdAt",
    "createdBy",
];

/// The nine allowed edge types between plan entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Implements,
    Addresses,
    DependsOn,
    Blocks,
    AlternativeTo,
    Supersedes,
    References,
    DerivedFrom,
    HasArtifact,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implements => "implements",
            Self::Addresses => "addresses",
            Self::DependsOn => "depends_on",
            Self::Blocks => "blocks",
            Self::AlternativeTo => "alternative_to",
            Self::Supersedes => "supersedes",
            Self::References => "references",
            Self::DerivedFrom => "derived_from",
            Self::HasArtifact => "has_artifact",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "implements" => Some(Self::Implements),
            "addresses" => Some(Self::Addresses),
            "depends_on" => Some(Self::DependsOn),
            "blocks" => Some(Self::Blocks),
            "alternative_to" => Some(Self::AlternativeTo),
            "supersedes" => Some(Self::Supersedes),
            "references" => Some(Self::References),
            "derived_from" => Some(Self::DerivedFrom),
            "has_artifact" => Some(Self::HasArtifact),
            _ => None,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed directed edge between two entities of the same plan. The triple
/// `(sourceId, targetId, relationType)` is unique per plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
}

impl Link {
    /// Composite key used both for dedup and for the create lock resource.
    pub fn composite_key(source_id: &str, target_id: &str, relation_type: RelationType) -> String {
        format!("{}:{}:{}", source_id, target_id, relation_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDraft {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl LinkDraft {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            metadata: None,
            created_by: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        if self.source_id.trim().is_empty() {
            issues.push(ValidationIssue::new("sourceId", "sourceId must not be empty"));
        }
        if self.target_id.trim().is_empty() {
            issues.push(ValidationIssue::new("targetId", "targetId must not be empty"));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(issues))
        }
    }

    pub fn into_link(self) -> Result<Link> {
        self.validate()?;
        Ok(Link {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: self.source_id,
            target_id: self.target_id,
            relation_type: self.relation_type,
            metadata: self.metadata,
            created_at: Utc::now(),
            created_by: self.created_by.unwrap_or_default(),
        })
    }
}
