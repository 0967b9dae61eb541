//! Plan lifecycle for one project: create, list, update, archive, and the
//! per-workspace active-plan binding.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Map;

use super::context::PlanContext;
use crate::core::{Result, StoreConfig, StoreError, MAX_HISTORY_DEPTH};
use crate::model::{
    validate_project_id, PlanManifest, PlanPatch, PlanStatistics, PlanStatus, Tag,
};
use crate::storage::{PlanRepository, StoreLayout};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    /// Explicit plan id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enable_history: Option<bool>,
    #[serde(default)]
    pub max_history_depth: Option<u8>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub manifest: PlanManifest,
    /// Freshly computed, not the manifest's materialized copy.
    pub statistics: PlanStatistics,
    pub total_links: usize,
}

#[derive(Clone)]
pub struct PlanService {
    project_id: String,
    plans: Arc<PlanRepository>,
    config: Arc<StoreConfig>,
}

impl PlanService {
    pub(crate) fn new(project_id: String, plans: Arc<PlanRepository>, config: Arc<StoreConfig>) -> Self {
        Self {
            project_id,
            plans,
            config,
        }
    }

    pub async fn create(&self, draft: PlanDraft) -> Result<PlanManifest> {
        StoreLayout::ensure_writable(&self.project_id)?;
        validate_project_id(&self.project_id)?;
        let max_history_depth = draft
            .max_history_depth
            .unwrap_or(self.config.default_max_history_depth);
        if max_history_depth > MAX_HISTORY_DEPTH {
            return Err(StoreError::validation(
                "maxHistoryDepth",
                format!("maxHistoryDepth must be within [0, {}]", MAX_HISTORY_DEPTH),
            ));
        }
        let now = Utc::now();
        let manifest = PlanManifest {
            id: draft.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            project_id: self.project_id.clone(),
            name: draft.name,
            description: draft.description,
            status: PlanStatus::Active,
            enable_history: draft.enable_history.unwrap_or(true),
            max_history_depth,
            created_at: now,
            updated_at: now,
            tags: draft.tags,
            statistics: PlanStatistics::default(),
            extra: Map::new(),
        };
        self.plans.create_plan(manifest).await
    }

    pub async fn list(&self) -> Result<Vec<PlanManifest>> {
        self.plans.list_plans(&self.project_id).await
    }

    pub async fn get(&self, plan_id: &str) -> Result<PlanManifest> {
        self.plans.load_manifest(&self.project_id, plan_id).await
    }

    pub async fn update(&self, plan_id: &str, patch: PlanPatch) -> Result<PlanManifest> {
        self.plans
            .update_manifest(&self.project_id, plan_id, |manifest| {
                if let Some(name) = patch.name {
                    manifest.name = Some(name);
                }
                if let Some(description) = patch.description {
                    manifest.description = Some(description);
                }
                if let Some(status) = patch.status {
                    manifest.status = status;
                }
                if let Some(enable_history) = patch.enable_history {
                    manifest.enable_history = enable_history;
                }
                if let Some(depth) = patch.max_history_depth {
                    manifest.max_history_depth = depth;
                }
                if let Some(tags) = patch.tags {
                    manifest.tags = tags;
                }
                Ok(())
            })
            .await
    }

    pub async fn archive(&self, plan_id: &str) -> Result<PlanManifest> {
        self.plans
            .update_manifest(&self.project_id, plan_id, |manifest| {
                manifest.status = PlanStatus::Archived;
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, plan_id: &str) -> Result<()> {
        self.plans.delete_plan(&self.project_id, plan_id).await
    }

    /// Bind a workspace to a plan. Returns the planId that was previously
    /// bound, if any (last writer wins).
    pub async fn set_active(
        &self,
        plan_id: &str,
        workspace_path: &str,
    ) -> Result<Option<String>> {
        if !self.plans.plan_exists(&self.project_id, plan_id).await? {
            return Err(StoreError::not_found("plan", plan_id));
        }
        self.plans
            .set_active(&self.project_id, workspace_path, plan_id)
            .await
    }

    pub async fn get_active(&self, workspace_path: &str) -> Result<Option<String>> {
        self.plans.get_active(&self.project_id, workspace_path).await
    }

    pub async fn get_summary(&self, plan_id: &str) -> Result<PlanSummary> {
        let context = PlanContext::open(
            Arc::clone(&self.plans),
            &self.config,
            &self.project_id,
            plan_id,
        )
        .await?;
        let manifest = context.manifest().await?;
        let statistics = context.compute_statistics().await?;
        let total_links = context.inner.links.count().await;
        Ok(PlanSummary {
            manifest,
            statistics,
            total_links,
        })
    }
}
