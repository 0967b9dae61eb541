use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{non_empty, EntityCore, EntityKind, EntityMetadata, PlanRecord, Tag};
use crate::core::{Result, StoreError, ValidationIssue};

pub(super) const FIELDS: &[&str] = &[
    "id",
    "type",
    "title",
    "description",
    "approach",
    "implementationNotes",
    "tradeoffs",
    "addressing",
    "evaluation",
    "status",
    "selectionReason",
    "createdAt",
    "updatedAt",
    "version",
    "metadata",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionStatus {
    Proposed,
    Selected,
    Rejected,
}

impl Default for SolutionStatus {
    fn default() -> Self {
        Self::Proposed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tradeoff {
    pub aspect: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffortEstimate {
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_estimate: Option<EffortEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_feasibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
    #[serde(flatten)]
    pub core: EntityCore,
    pub title: String,
    pub description: String,
    pub approach: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_notes: Option<String>,
    #[serde(default)]
    pub tradeoffs: Vec<Tradeoff>,
    /// Requirement ids this solution addresses.
    #[serde(default)]
    pub addressing: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(default)]
    pub status: SolutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanRecord for Solution {
    const KIND: EntityKind = EntityKind::Solution;

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
        non_empty("approach", &self.approach, &mut issues);
        for (i, tradeoff) in self.tradeoffs.iter().enumerate() {
            if tradeoff.aspect.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("tradeoffs[{}].aspect", i),
                    "aspect must not be empty",
                ));
            }
        }
        if let Some(eval) = &self.evaluation {
            if let Some(estimate) = &eval.effort_estimate {
                if estimate.value < 0.0 {
                    issues.push(ValidationIssue::new(
                        "evaluation.effortEstimate.value",
                        "effort must not be negative",
                    ));
                }
                if let Some(confidence) = estimate.confidence {
                    if !(0.0..=1.0).contains(&confidence) {
                        issues.push(ValidationIssue::new(
                            "evaluation.effortEstimate.confidence",
                            "confidence must be within [0, 1]",
                        ));
                    }
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
pub struct SolutionDraft {
    pub title: String,
    pub description: String,
    pub approach: String,
    #[serde(default)]
    pub implementation_notes: Option<String>,
    #[serde(default)]
    pub tradeoffs: Vec<Tradeoff>,
    #[serde(default)]
    pub addressing: Vec<String>,
    #[serde(default)]
    pub evaluation: Option<Evaluation>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl SolutionDraft {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        approach: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            approach: approach.into(),
            ..Self::default()
        }
    }

    pub fn addressing(mut self, requirement_ids: Vec<String>) -> Self {
        self.addressing = requirement_ids;
        self
    }

    pub fn into_solution(self) -> Result<Solution> {
        let mut metadata = EntityMetadata::created_by(self.created_by.unwrap_or_default());
        metadata.tags = self.tags;
        let solution = Solution {
            core: EntityCore::new(EntityKind::Solution, metadata),
            title: self.title,
            description: self.description,
            approach: self.approach,
            implementation_notes: self.implementation_notes,
            tradeoffs: self.tradeoffs,
            addressing: self.addressing,
            evaluation: self.evaluation,
            status: SolutionStatus::Proposed,
            selection_reason: None,
            extra: Map::new(),
        };
        solution.validate()?;
        Ok(solution)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tradeoffs: Option<Vec<Tradeoff>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addressing: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SolutionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_defaults_to_proposed() {
        let solution = SolutionDraft::new("Cache layer", "Add a cache", "LRU in front of disk")
            .into_solution()
            .unwrap();
        assert_eq!(solution.status, SolutionStatus::Proposed);
        assert!(solution.selection_reason.is_none());
    }

    #[test]
    fn confidence_out_of_range_is_rejected() {
        let mut draft = SolutionDraft::new("t", "d", "a");
        draft.evaluation = Some(Evaluation {
            effort_estimate: Some(EffortEstimate {
                value: 3.0,
                unit: "days".into(),
                confidence: Some(1.5),
            }),
            ..Evaluation::default()
        });
        assert!(draft.into_solution().is_err());
    }
}
