//! Plan directory lifecycle, manifest persistence, and the per-workspace
//! active-plan index. Manifest and active-index writes go through their own
//! project-level lock resources; the legacy layout is rejected on every
//! write path.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::atomic;
use super::layout::{PlanPaths, StoreLayout};
use super::lock::LockManager;
use crate::core::{LockConfig, Result, StoreError};
use crate::model::PlanManifest;

/// Dedicated resource guarding `active-plans.json`.
const ACTIVE_PLANS_RESOURCE: &str = "active-plans";

/// Map `workspacePath → planId`, persisted as a single file in the project
/// root.
pub type ActivePlanMap = BTreeMap<String, String>;

pub struct PlanRepository {
    layout: StoreLayout,
    lock_config: LockConfig,
    project_locks: Mutex<HashMap<String, LockManager>>,
}

impl PlanRepository {
    pub fn new(layout: StoreLayout, lock_config: LockConfig) -> Self {
        Self {
            layout,
            lock_config,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn plan_paths(&self, project_id: &str, plan_id: &str) -> PlanPaths {
        self.layout.plan_paths(project_id, plan_id)
    }

    async fn project_locks(&self, project_id: &str) -> Result<LockManager> {
        let mut managers = self.project_locks.lock().await;
        if let Some(manager) = managers.get(project_id) {
            return Ok(manager.clone());
        }
        let manager = LockManager::new(
            self.layout.project_locks_dir(project_id),
            self.lock_config.clone(),
        );
        manager.initialize().await?;
        managers.insert(project_id.to_string(), manager.clone());
        Ok(manager)
    }

    // ------------------------------------------------------------------
    // Plan lifecycle
    // ------------------------------------------------------------------

    pub async fn plan_exists(&self, project_id: &str, plan_id: &str) -> Result<bool> {
        let paths = self.plan_paths(project_id, plan_id);
        Ok(tokio::fs::try_exists(paths.manifest_file()).await?)
    }

    pub async fn create_plan(&self, manifest: PlanManifest) -> Result<PlanManifest> {
        StoreLayout::ensure_writable(&manifest.project_id)?;
        manifest.validate()?;
        let paths = self.plan_paths(&manifest.project_id, &manifest.id);
        if tokio::fs::try_exists(paths.manifest_file()).await? {
            return Err(StoreError::duplicate("plan", &manifest.id));
        }

        tokio::fs::create_dir_all(paths.entities_dir()).await?;
        tokio::fs::create_dir_all(paths.links_dir()).await?;
        tokio::fs::create_dir_all(paths.indexes_dir()).await?;
        tokio::fs::create_dir_all(paths.locks_dir()).await?;
        tokio::fs::create_dir_all(paths.exports_dir()).await?;
        atomic::write_json(&paths.manifest_file(), &manifest).await?;
        tracing::info!(project = %manifest.project_id, plan = %manifest.id, "plan created");
        Ok(manifest)
    }

    pub async fn load_manifest(&self, project_id: &str, plan_id: &str) -> Result<PlanManifest> {
        let paths = self.plan_paths(project_id, plan_id);
        atomic::read_json_opt(&paths.manifest_file())
            .await?
            .ok_or_else(|| StoreError::not_found("plan", plan_id))
    }

    /// Read-modify-write of the manifest under the plan's project-level
    /// lock. `apply` sees the current manifest; `updatedAt` is stamped here.
    pub async fn update_manifest<F>(
        &self,
        project_id: &str,
        plan_id: &str,
        apply: F,
    ) -> Result<PlanManifest>
    where
        F: FnOnce(&mut PlanManifest) -> Result<()>,
    {
        StoreLayout::ensure_writable(project_id)?;
        let locks = self.project_locks(project_id).await?;
        let resource = format!("plan:{}", plan_id);
        locks
            .with_lock(&resource, || async {
                let mut manifest = self.load_manifest(project_id, plan_id).await?;
                apply(&mut manifest)?;
                manifest.updated_at = Utc::now();
                manifest.validate()?;
                let paths = self.plan_paths(project_id, plan_id);
                atomic::write_json(&paths.manifest_file(), &manifest).await?;
                Ok(manifest)
            })
            .await
    }

    pub async fn list_plans(&self, project_id: &str) -> Result<Vec<PlanManifest>> {
        let plans_dir = self.layout.plans_dir(project_id);
        let mut manifests = Vec::new();
        let mut entries = match tokio::fs::read_dir(&plans_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(manifests),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let manifest_file = entry.path().join(super::layout::MANIFEST_FILE);
            match atomic::read_json_opt::<PlanManifest>(&manifest_file).await {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %manifest_file.display(), error = %e, "skipping unreadable manifest");
                }
            }
        }
        manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(manifests)
    }

    /// Remove the plan directory and everything it owns.
    pub async fn delete_plan(&self, project_id: &str, plan_id: &str) -> Result<()> {
        StoreLayout::ensure_writable(project_id)?;
        let paths = self.plan_paths(project_id, plan_id);
        if !tokio::fs::try_exists(paths.manifest_file()).await? {
            return Err(StoreError::not_found("plan", plan_id));
        }
        tokio::fs::remove_dir_all(paths.root()).await?;
        tracing::info!(project = %project_id, plan = %plan_id, "plan deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Active-plan index
    // ------------------------------------------------------------------

    pub async fn active_plans(&self, project_id: &str) -> Result<ActivePlanMap> {
        let path = self.layout.active_plans_file(project_id);
        Ok(atomic::read_json_opt(&path).await?.unwrap_or_default())
    }

    pub async fn get_active(
        &self,
        project_id: &str,
        workspace_path: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .active_plans(project_id)
            .await?
            .get(workspace_path)
            .cloned())
    }

    /// Last writer wins under the dedicated lock; the previous binding is
    /// returned so callers can report what was replaced.
    pub async fn set_active(
        &self,
        project_id: &str,
        workspace_path: &str,
        plan_id: &str,
    ) -> Result<Option<String>> {
        StoreLayout::ensure_writable(project_id)?;
        let locks = self.project_locks(project_id).await?;
        locks
            .with_lock(ACTIVE_PLANS_RESOURCE, || async {
                let path = self.layout.active_plans_file(project_id);
                let mut map: ActivePlanMap =
                    atomic::read_json_opt(&path).await?.unwrap_or_default();
                let previous = map.insert(workspace_path.to_string(), plan_id.to_string());
                atomic::write_json(&path, &map).await?;
                Ok(previous)
            })
            .await
    }

    pub async fn clear_active(&self, project_id: &str, workspace_path: &str) -> Result<bool> {
        StoreLayout::ensure_writable(project_id)?;
        let locks = self.project_locks(project_id).await?;
        locks
            .with_lock(ACTIVE_PLANS_RESOURCE, || async {
                let path = self.layout.active_plans_file(project_id);
                let mut map: ActivePlanMap =
                    atomic::read_json_opt(&path).await?.unwrap_or_default();
                let removed = map.remove(workspace_path).is_some();
                if removed {
                    atomic::write_json(&path, &map).await?;
                }
                Ok(removed)
            })
            .await
    }
}
