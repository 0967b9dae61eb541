use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single malformed-input finding attached to a `Validation` error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(field: impl Into<String>, message: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: Some(value),
        }
    }
}

/// One failed operation inside a batch, plus anything that could not be
/// rolled back afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub index: usize,
    pub entity_type: String,
    pub message: String,
    /// Ids of entities created by earlier operations that the rollback
    /// failed to delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreverted: Vec<String>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: String, id: String },

    #[error("{entity_type} with key '{key}' already exists")]
    Duplicate { entity_type: String, key: String },

    #[error("Version conflict on {entity_type} '{id}': expected {expected}, actual {actual}")]
    VersionConflict {
        entity_type: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Timed out acquiring lock on '{resource}' after {waited_ms} ms")]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("Lock on '{resource}' was compromised while held")]
    LockCompromised { resource: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Batch failed: {message}")]
    Batch {
        message: String,
        failures: Vec<BatchFailure>,
    },

    #[error("Store has been disposed")]
    Disposed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![ValidationIssue::new(field, message)])
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(entity_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            key: key.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable code, used as the prefix of user-visible
    /// error messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Duplicate { .. } => "CONFLICT_DUPLICATE",
            Self::VersionConflict { .. } => "CONFLICT_VERSION",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::LockCompromised { .. } => "LOCK_COMPROMISED",
            Self::Integrity(_) => "INTEGRITY",
            Self::Batch { .. } => "BATCH",
            Self::Disposed => "DISPOSED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(StoreError::validation("title", "required").code(), "VALIDATION");
        assert_eq!(StoreError::not_found("requirement", "x").code(), "NOT_FOUND");
        assert_eq!(StoreError::duplicate("link", "a:b:implements").code(), "CONFLICT_DUPLICATE");
        assert_eq!(StoreError::Disposed.code(), "DISPOSED");
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = StoreError::Validation(vec![
            ValidationIssue::new("title", "must not be empty"),
            ValidationIssue::new("order", "out of range"),
        ]);
        let text = err.to_string();
        assert!(text.contains("title: must not be empty"));
        assert!(text.contains("order: out of range"));
    }
}
