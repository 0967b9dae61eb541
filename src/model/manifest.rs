use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Tag;
use crate::core::{Result, StoreError, ValidationIssue, MAX_HISTORY_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Archived,
    Completed,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Materialized entity counts, recomputed by the plan service after every
/// entity create/delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatistics {
    pub total_requirements: usize,
    pub total_solutions: usize,
    pub total_decisions: usize,
    pub total_phases: usize,
    pub total_artifacts: usize,
    /// Rounded mean progress over all phases; 0 when the plan has none.
    pub completion_percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanManifest {
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub enable_history: bool,
    #[serde(default)]
    pub max_history_depth: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub statistics: PlanStatistics,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanManifest {
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        if self.id.trim().is_empty() {
            issues.push(ValidationIssue::new("id", "plan id must not be empty"));
        }
        if self.max_history_depth > MAX_HISTORY_DEPTH {
            issues.push(ValidationIssue::with_value(
                "maxHistoryDepth",
                format!("maxHistoryDepth must be within [0, {}]", MAX_HISTORY_DEPTH),
                Value::from(self.max_history_depth),
            ));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(issues))
        }
    }
}

/// Fields of a plan the `update` action may change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PlanStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_history: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_depth: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}
