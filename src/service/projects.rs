//! Project lifecycle: directories under the base dir, one `project.json`
//! config each. The legacy sentinel is rejected on every action.

use crate::core::{Result, StoreError};
use crate::storage::atomic;
use crate::model::{validate_project_id, ProjectConfig};
use crate::storage::StoreLayout;

#[derive(Clone)]
pub struct ProjectService {
    layout: StoreLayout,
}

impl ProjectService {
    pub(crate) fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub async fn init(&self, config: ProjectConfig) -> Result<ProjectConfig> {
        StoreLayout::ensure_writable(&config.project_id)?;
        config.validate()?;
        let path = self.layout.project_config_file(&config.project_id);
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::duplicate("project", &config.project_id));
        }
        tokio::fs::create_dir_all(self.layout.plans_dir(&config.project_id)).await?;
        atomic::write_json(&path, &config).await?;
        tracing::info!(project = %config.project_id, "project initialized");
        Ok(config)
    }

    pub async fn get(&self, project_id: &str) -> Result<ProjectConfig> {
        validate_project_id(project_id)?;
        atomic::read_json_opt(&self.layout.project_config_file(project_id))
            .await?
            .ok_or_else(|| StoreError::not_found("project", project_id))
    }

    pub async fn list(&self) -> Result<Vec<ProjectConfig>> {
        let mut projects = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.layout.base_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(projects),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if StoreLayout::is_legacy(&name) || validate_project_id(&name).is_err() {
                continue;
            }
            if let Some(config) = atomic::read_json_opt::<ProjectConfig>(
                &self.layout.project_config_file(&name),
            )
            .await?
            {
                projects.push(config);
            }
        }
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(projects)
    }

    /// Remove the project directory and every plan under it.
    pub async fn delete(&self, project_id: &str) -> Result<()> {
        StoreLayout::ensure_writable(project_id)?;
        validate_project_id(project_id)?;
        let dir = self.layout.project_dir(project_id);
        if !tokio::fs::try_exists(self.layout.project_config_file(project_id)).await? {
            return Err(StoreError::not_found("project", project_id));
        }
        tokio::fs::remove_dir_all(&dir).await?;
        tracing::info!(project = %project_id, "project deleted");
        Ok(())
    }
}
