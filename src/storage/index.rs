//! Per-(plan, entity-type) on-disk index: id → file metadata. The on-disk
//! file is the source of truth across processes; the in-memory copy serves
//! reads and is refreshed on every mutation.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::atomic;
use crate::core::Result;
use crate::model::{EntityKind, RelationType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub file_path: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<RelationType>,
}

impl IndexRecord {
    pub fn entity(kind: EntityKind, id: &str, file_path: String, version: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            file_path,
            version,
            updated_at,
            source_id: None,
            target_id: None,
            relation_type: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    records: Vec<IndexRecord>,
}

pub struct IndexManager {
    path: PathBuf,
    records: Mutex<HashMap<String, IndexRecord>>,
}

impl IndexManager {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Load the on-disk index; a missing file starts empty.
    pub async fn initialize(&self) -> Result<()> {
        let loaded: Option<IndexFile> = atomic::read_json_opt(&self.path).await?;
        let mut records = self.records.lock().await;
        records.clear();
        if let Some(file) = loaded {
            for record in file.records {
                records.insert(record.id.clone(), record);
            }
        }
        Ok(())
    }

    pub async fn add(&self, record: IndexRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record);
        self.flush(&records).await
    }

    pub async fn update(&self, record: IndexRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(record.id.clone(), record);
        self.flush(&records).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.lock().await;
        let removed = records.remove(id).is_some();
        if removed {
            self.flush(&records).await?;
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<IndexRecord> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn get_all(&self) -> Vec<IndexRecord> {
        let mut all: Vec<IndexRecord> = self.records.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn has(&self, id: &str) -> bool {
        self.records.lock().await.contains_key(id)
    }

    pub async fn size(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Serialized by the records mutex held by every mutation.
    async fn flush(&self, records: &HashMap<String, IndexRecord>) -> Result<()> {
        let mut file = IndexFile {
            records: records.values().cloned().collect(),
        };
        file.records.sort_by(|a, b| a.id.cmp(&b.id));
        atomic::write_json(&self.path, &file).await
    }
}
