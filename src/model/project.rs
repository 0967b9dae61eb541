use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Result, StoreError, ValidationIssue};

/// Workspace-local project binding, persisted as `project.json` inside the
/// project directory (the host's `.mcp-config.json` mirrors this shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProjectConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            name: None,
            description: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_project_id(&self.project_id)
    }
}

/// Windows device names a project id may not shadow, compared
/// case-insensitively.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Project ids become directory names, so the rules are filesystem rules:
/// 1-50 chars of `[A-Za-z0-9._-]`, no leading `.`/`_`/`-`, no `..`, no
/// trailing `.`/`-`, and no reserved OS device name.
pub fn validate_project_id(project_id: &str) -> Result<()> {
    let fail = |message: &str| {
        Err(StoreError::Validation(vec![ValidationIssue::with_value(
            "projectId",
            message,
            Value::String(project_id.to_string()),
        )]))
    };

    if project_id.is_empty() || project_id.len() > 50 {
        return fail("projectId must be 1-50 characters");
    }
    if project_id.contains('/') || project_id.contains('\\') {
        return fail("projectId must not contain path separators");
    }
    if !project_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return fail("projectId may only contain alphanumerics, '.', '_' and '-'");
    }
    let first = project_id.chars().next().unwrap();
    if matches!(first, '.' | '_' | '-') {
        return fail("projectId must not start with '.', '_' or '-'");
    }
    if project_id.contains("..") {
        return fail("projectId must not contain consecutive dots");
    }
    let last = project_id.chars().last().unwrap();
    if matches!(last, '.' | '-') {
        return fail("projectId must not end with '.' or '-'");
    }
    let upper = project_id.to_ascii_uppercase();
    if RESERVED_NAMES.contains(&upper.as_str()) {
        return fail("projectId must not be a reserved OS name");
    }
    Ok(())
}
