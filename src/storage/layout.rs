//! Directory layout of the storage tree.
//!
//! ```text
//! <baseDir>/<projectId>/plans/<planId>/
//!     manifest.json
//!     entities/<type>-<id>.json
//!     links/<linkId>.json
//!     indexes/{<type>-index.json, link-index.json}
//!     history/<type>/<entityId>.json
//!     .locks/
//!     exports/
//! ```
//!
//! A pre-project layout (`<baseDir>/plans/<planId>/…`) is still readable
//! through the reserved `_legacy` project id; nothing is ever written there.

use std::path::{Path, PathBuf};

use crate::core::{Result, StoreError};
use crate::model::EntityKind;

/// Sentinel project id granting read-only access to the legacy layout.
pub const LEGACY_PROJECT_ID: &str = "_legacy";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ACTIVE_PLANS_FILE: &str = "active-plans.json";
pub const PROJECT_CONFIG_FILE: &str = "project.json";

/// Paths rooted at the base directory.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    base_dir: PathBuf,
}

impl StoreLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_legacy(project_id: &str) -> bool {
        project_id == LEGACY_PROJECT_ID
    }

    /// Fails for the legacy sentinel: use it to guard every write path.
    pub fn ensure_writable(project_id: &str) -> Result<()> {
        if Self::is_legacy(project_id) {
            return Err(StoreError::Integrity(
                "the legacy plan layout is read-only".to_string(),
            ));
        }
        Ok(())
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        if Self::is_legacy(project_id) {
            // Legacy plans live directly under the base directory.
            self.base_dir.clone()
        } else {
            self.base_dir.join(project_id)
        }
    }

    pub fn project_config_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(PROJECT_CONFIG_FILE)
    }

    pub fn plans_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("plans")
    }

    pub fn active_plans_file(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(ACTIVE_PLANS_FILE)
    }

    /// Lock directory for project-level resources (active-plan index, plan
    /// directory lifecycle).
    pub fn project_locks_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(".locks")
    }

    pub fn plan_paths(&self, project_id: &str, plan_id: &str) -> PlanPaths {
        PlanPaths {
            root: self.plans_dir(project_id).join(plan_id),
        }
    }
}

/// Paths inside one plan directory. The plan directory exclusively owns
/// every file below it.
#[derive(Debug, Clone)]
pub struct PlanPaths {
    root: PathBuf,
}

impl PlanPaths {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn entities_dir(&self) -> PathBuf {
        self.root.join("entities")
    }

    pub fn entity_file(&self, kind: EntityKind, id: &str) -> PathBuf {
        self.entities_dir().join(format!("{}-{}.json", kind, id))
    }

    pub fn links_dir(&self) -> PathBuf {
        self.root.join("links")
    }

    pub fn link_file(&self, link_id: &str) -> PathBuf {
        self.links_dir().join(format!("{}.json", link_id))
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    pub fn index_file(&self, kind: EntityKind) -> PathBuf {
        match kind {
            EntityKind::Link => self.indexes_dir().join("link-index.json"),
            other => self.indexes_dir().join(format!("{}-index.json", other)),
        }
    }

    pub fn history_dir(&self, kind: EntityKind) -> PathBuf {
        self.root.join("history").join(kind.as_str())
    }

    pub fn history_file(&self, kind: EntityKind, entity_id: &str) -> PathBuf {
        self.history_dir(kind).join(format!("{}.json", entity_id))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }
}
