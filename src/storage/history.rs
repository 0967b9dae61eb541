//! Bounded pre-update snapshots per entity, and field-level diffs between
//! recorded versions. Services snapshot the entity they are about to
//! overwrite; the list is append-only with the oldest entry evicted past
//! the plan's `maxHistoryDepth`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::atomic;
use super::layout::PlanPaths;
use crate::core::{Result, StoreError};
use crate::model::{EntityKind, PlanRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub snapshot: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHistory {
    pub entity_id: String,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
}

pub struct VersionHistoryService {
    paths: Arc<PlanPaths>,
    enabled: bool,
    max_depth: u8,
}

impl VersionHistoryService {
    pub fn new(paths: Arc<PlanPaths>, enabled: bool, max_depth: u8) -> Self {
        Self {
            paths,
            enabled,
            max_depth,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.max_depth > 0
    }

    /// Append the pre-update state of `entity`. Called by domain services
    /// right before a successful update is committed.
    pub async fn record<T: PlanRecord>(
        &self,
        entity: &T,
        author: Option<String>,
        note: Option<String>,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let path = self.paths.history_file(T::KIND, entity.id());
        let mut history: EntityHistory = atomic::read_json_opt(&path)
            .await?
            .unwrap_or_else(|| EntityHistory {
                entity_id: entity.id().to_string(),
                entity_type: T::KIND,
                versions: Vec::new(),
            });
        history.versions.push(VersionEntry {
            version: entity.version(),
            timestamp: Utc::now(),
            author,
            note,
            snapshot: serde_json::to_value(entity)?,
        });
        while history.versions.len() > self.max_depth as usize {
            history.versions.remove(0);
        }
        atomic::write_json(&path, &history).await
    }

    /// The recorded history; an entity that was never updated has an empty
    /// version list.
    pub async fn history(&self, kind: EntityKind, entity_id: &str) -> Result<EntityHistory> {
        let path = self.paths.history_file(kind, entity_id);
        Ok(atomic::read_json_opt(&path)
            .await?
            .unwrap_or_else(|| EntityHistory {
                entity_id: entity_id.to_string(),
                entity_type: kind,
                versions: Vec::new(),
            }))
    }

    /// Field-level diff between two recorded versions. When a requested
    /// version is the live entity's, `live` supplies the synthesized
    /// snapshot.
    pub async fn diff(
        &self,
        kind: EntityKind,
        entity_id: &str,
        v1: u64,
        v2: u64,
        live: Option<(u64, Value)>,
    ) -> Result<Vec<FieldChange>> {
        let history = self.history(kind, entity_id).await?;
        let resolve = |wanted: u64| -> Option<Value> {
            if let Some((live_version, live_doc)) = &live {
                if *live_version == wanted {
                    return Some(live_doc.clone());
                }
            }
            history
                .versions
                .iter()
                .find(|entry| entry.version == wanted)
                .map(|entry| entry.snapshot.clone())
        };
        let before = resolve(v1).ok_or_else(|| {
            StoreError::not_found(format!("{} version", kind), v1.to_string())
        })?;
        let after = resolve(v2).ok_or_else(|| {
            StoreError::not_found(format!("{} version", kind), v2.to_string())
        })?;
        Ok(diff_documents(&before, &after))
    }
}

/// Flat field-path diff. Objects recurse; arrays and scalars compare as
/// whole values.
pub fn diff_documents(before: &Value, after: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    diff_into("", before, after, &mut changes);
    changes
}

fn diff_into(prefix: &str, before: &Value, after: &Value, changes: &mut Vec<FieldChange>) {
    match (before, after) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, value_a) in a {
                let path = join_path(prefix, key);
                match b.get(key) {
                    Some(value_b) => diff_into(&path, value_a, value_b, changes),
                    None => changes.push(FieldChange {
                        field: path,
                        change: ChangeKind::Removed,
                        from: Some(value_a.clone()),
                        to: None,
                    }),
                }
            }
            for (key, value_b) in b {
                if !a.contains_key(key) {
                    changes.push(FieldChange {
                        field: join_path(prefix, key),
                        change: ChangeKind::Added,
                        from: None,
                        to: Some(value_b.clone()),
                    });
                }
            }
        }
        (a, b) => {
            if a != b {
                changes.push(FieldChange {
                    field: prefix.to_string(),
                    change: ChangeKind::Changed,
                    from: Some(a.clone()),
                    to: Some(b.clone()),
                });
            }
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}
