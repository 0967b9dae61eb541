//! `PlanStore` is the single entry point: open a base directory, reach
//! projects, plans, and per-plan service contexts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::{Result, StoreConfig};
use crate::service::{PlanContext, PlanService, ProjectService};
use crate::storage::{PlanRepository, StoreLayout};

pub struct PlanStore {
    config: Arc<StoreConfig>,
    layout: StoreLayout,
    plans: Arc<PlanRepository>,
    contexts: Mutex<HashMap<(String, String), PlanContext>>,
}

impl PlanStore {
    /// Open (and if needed create) the storage tree rooted at the
    /// configured base directory.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.base_dir).await?;
        let layout = StoreLayout::new(&config.base_dir);
        let plans = Arc::new(PlanRepository::new(layout.clone(), config.lock.clone()));
        Ok(Self {
            config: Arc::new(config),
            layout,
            plans,
            contexts: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn projects(&self) -> ProjectService {
        ProjectService::new(self.layout.clone())
    }

    pub fn plans(&self, project_id: &str) -> PlanService {
        PlanService::new(
            project_id.to_string(),
            Arc::clone(&self.plans),
            Arc::clone(&self.config),
        )
    }

    /// Service context for one plan. Contexts are cached per
    /// (project, plan) so repositories and caches are shared within the
    /// process.
    pub async fn context(&self, project_id: &str, plan_id: &str) -> Result<PlanContext> {
        let key = (project_id.to_string(), plan_id.to_string());
        let mut contexts = self.contexts.lock().await;
        if let Some(context) = contexts.get(&key) {
            return Ok(context.clone());
        }
        let context = PlanContext::open(
            Arc::clone(&self.plans),
            &self.config,
            project_id,
            plan_id,
        )
        .await?;
        contexts.insert(key, context.clone());
        Ok(context)
    }

    /// Drop a cached context (e.g. after plan deletion or a history
    /// settings change, which is only picked up on reopen).
    pub async fn evict_context(&self, project_id: &str, plan_id: &str) {
        let key = (project_id.to_string(), plan_id.to_string());
        self.contexts.lock().await.remove(&key);
    }

    /// Dispose every cached context's lock manager. In-flight acquires are
    /// woken with `Disposed`; new acquires fail.
    pub async fn dispose(&self) {
        let contexts: Vec<PlanContext> = {
            let mut map = self.contexts.lock().await;
            map.drain().map(|(_, context)| context).collect()
        };
        for context in contexts {
            context.locks().dispose().await;
        }
    }
}
