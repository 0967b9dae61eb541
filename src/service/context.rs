//! Shared wiring for the domain services of one plan: the repositories,
//! the lock manager, the version-history service, and the cross-entity
//! helpers none of the repositories can provide alone.

use std::sync::Arc;

use serde_json::Value;

use crate::core::{Result, StoreConfig, StoreError};
use crate::model::{
    Artifact, Decision, EntityKind, Phase, PhaseStatus, PlanManifest, PlanRecord, Requirement,
    Solution,
};
use crate::storage::{
    EntityHistory, EntityRepository, FieldChange, LinkRepository, LockManager, PlanPaths,
    PlanRepository, StoreLayout, VersionHistoryService,
};

pub(crate) struct ContextInner {
    pub project_id: String,
    pub plan_id: String,
    pub paths: Arc<PlanPaths>,
    pub locks: LockManager,
    pub requirements: EntityRepository<Requirement>,
    pub solutions: EntityRepository<Solution>,
    pub decisions: EntityRepository<Decision>,
    pub phases: EntityRepository<Phase>,
    pub artifacts: EntityRepository<Artifact>,
    pub links: LinkRepository,
    pub history: VersionHistoryService,
    pub plans: Arc<PlanRepository>,
}

/// Handle to one plan's services. Cheap to clone.
#[derive(Clone)]
pub struct PlanContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl PlanContext {
    pub async fn open(
        plans: Arc<PlanRepository>,
        config: &StoreConfig,
        project_id: &str,
        plan_id: &str,
    ) -> Result<Self> {
        let manifest = plans.load_manifest(project_id, plan_id).await?;
        let paths = Arc::new(plans.plan_paths(project_id, plan_id));
        let locks = LockManager::new(paths.locks_dir(), config.lock.clone());
        locks.initialize().await?;

        let requirements =
            EntityRepository::new(Arc::clone(&paths), locks.clone(), config.cache_capacity);
        let solutions =
            EntityRepository::new(Arc::clone(&paths), locks.clone(), config.cache_capacity);
        let decisions =
            EntityRepository::new(Arc::clone(&paths), locks.clone(), config.cache_capacity);
        let phases =
            EntityRepository::new(Arc::clone(&paths), locks.clone(), config.cache_capacity);
        let artifacts =
            EntityRepository::new(Arc::clone(&paths), locks.clone(), config.cache_capacity);
        let links = LinkRepository::new(Arc::clone(&paths), locks.clone(), config.cache_capacity);

        futures::try_join!(
            requirements.initialize(),
            solutions.initialize(),
            decisions.initialize(),
            phases.initialize(),
            artifacts.initialize(),
            links.initialize(),
        )?;

        let history = VersionHistoryService::new(
            Arc::clone(&paths),
            manifest.enable_history,
            manifest.max_history_depth,
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                project_id: project_id.to_string(),
                plan_id: plan_id.to_string(),
                paths,
                locks,
                requirements,
                solutions,
                decisions,
                phases,
                artifacts,
                links,
                history,
                plans,
            }),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    pub fn plan_id(&self) -> &str {
        &self.inner.plan_id
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    pub fn requirement_repo(&self) -> &EntityRepository<Requirement> {
        &self.inner.requirements
    }

    pub fn solution_repo(&self) -> &EntityRepository<Solution> {
        &self.inner.solutions
    }

    pub fn decision_repo(&self) -> &EntityRepository<Decision> {
        &self.inner.decisions
    }

    pub fn phase_repo(&self) -> &EntityRepository<Phase> {
        &self.inner.phases
    }

    pub fn artifact_repo(&self) -> &EntityRepository<Artifact> {
        &self.inner.artifacts
    }

    pub fn link_repo(&self) -> &LinkRepository {
        &self.inner.links
    }

    pub async fn manifest(&self) -> Result<PlanManifest> {
        self.inner
            .plans
            .load_manifest(&self.inner.project_id, &self.inner.plan_id)
            .await
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        StoreLayout::ensure_writable(&self.inner.project_id)
    }

    // ------------------------------------------------------------------
    // Cross-entity helpers
    // ------------------------------------------------------------------

    /// Which entity kind, if any, owns this id. Scans every entity type of
    /// the plan; links are not entities and are not scanned.
    pub async fn entity_kind_of(&self, id: &str) -> Result<Option<EntityKind>> {
        let inner = &self.inner;
        if inner.requirements.exists(id).await? {
            return Ok(Some(EntityKind::Requirement));
        }
        if inner.solutions.exists(id).await? {
            return Ok(Some(EntityKind::Solution));
        }
        if inner.decisions.exists(id).await? {
            return Ok(Some(EntityKind::Decision));
        }
        if inner.phases.exists(id).await? {
            return Ok(Some(EntityKind::Phase));
        }
        if inner.artifacts.exists(id).await? {
            return Ok(Some(EntityKind::Artifact));
        }
        Ok(None)
    }

    /// Recompute the manifest's materialized statistics from the indexes
    /// and phase progress. Invoked by services after entity create/delete.
    pub async fn refresh_statistics(&self) -> Result<PlanManifest> {
        let statistics = self.compute_statistics().await?;
        self.inner
            .plans
            .update_manifest(&self.inner.project_id, &self.inner.plan_id, |manifest| {
                manifest.statistics = statistics;
                Ok(())
            })
            .await
    }

    pub async fn compute_statistics(&self) -> Result<crate::model::PlanStatistics> {
        let inner = &self.inner;
        let phases = inner.phases.find_all().await?;
        let completion_percentage = completion_of(&phases);
        Ok(crate::model::PlanStatistics {
            total_requirements: inner.requirements.count(None).await?,
            total_solutions: inner.solutions.count(None).await?,
            total_decisions: inner.decisions.count(None).await?,
            total_phases: phases.len(),
            total_artifacts: inner.artifacts.count(None).await?,
            completion_percentage,
        })
    }

    // ------------------------------------------------------------------
    // History plumbing shared by the per-entity services
    // ------------------------------------------------------------------

    pub(crate) async fn record_history<T: PlanRecord>(
        &self,
        entity: &T,
        note: Option<String>,
    ) -> Result<()> {
        let author = {
            let by = &entity.core().metadata.created_by;
            (!by.is_empty()).then(|| by.clone())
        };
        if let Err(e) = self.inner.history.record(entity, author, note).await {
            // History is best-effort: never fail the mutation for it.
            tracing::warn!(kind = %T::KIND, id = %entity.id(), error = %e, "failed to record history");
        }
        Ok(())
    }

    pub async fn entity_history(&self, kind: EntityKind, id: &str) -> Result<EntityHistory> {
        self.inner.history.history(kind, id).await
    }

    pub async fn entity_diff(
        &self,
        kind: EntityKind,
        id: &str,
        v1: u64,
        v2: u64,
    ) -> Result<Vec<FieldChange>> {
        let live = self.live_document(kind, id).await?;
        self.inner.history.diff(kind, id, v1, v2, live).await
    }

    async fn live_document(&self, kind: EntityKind, id: &str) -> Result<Option<(u64, Value)>> {
        let inner = &self.inner;
        let pair = match kind {
            EntityKind::Requirement => inner
                .requirements
                .find_by_id_opt(id)
                .await?
                .map(|e| (e.version(), serde_json::to_value(&e))),
            EntityKind::Solution => inner
                .solutions
                .find_by_id_opt(id)
                .await?
                .map(|e| (e.version(), serde_json::to_value(&e))),
            EntityKind::Decision => inner
                .decisions
                .find_by_id_opt(id)
                .await?
                .map(|e| (e.version(), serde_json::to_value(&e))),
            EntityKind::Phase => inner
                .phases
                .find_by_id_opt(id)
                .await?
                .map(|e| (e.version(), serde_json::to_value(&e))),
            EntityKind::Artifact => inner
                .artifacts
                .find_by_id_opt(id)
                .await?
                .map(|e| (e.version(), serde_json::to_value(&e))),
            EntityKind::Link => None,
        };
        match pair {
            Some((version, Ok(doc))) => Ok(Some((version, doc))),
            Some((_, Err(e))) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// Rounded mean progress over all phases; completed phases count as 100
/// regardless of their recorded progress.
pub(crate) fn completion_of(phases: &[Phase]) -> u8 {
    if phases.is_empty() {
        return 0;
    }
    let total: u64 = phases
        .iter()
        .map(|phase| {
            if phase.status == PhaseStatus::Completed {
                100u64
            } else {
                phase.progress as u64
            }
        })
        .sum();
    ((total as f64 / phases.len() as f64).round() as u64).min(100) as u8
}

impl StoreError {
    pub(crate) fn too_many_ids(limit: usize) -> Self {
        StoreError::validation("ids", format!("at most {} ids per call", limit))
    }
}
