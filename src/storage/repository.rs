//! Generic file-backed repository for one entity type of one plan. Owns the
//! entity files, the per-type index, and a bounded LRU cache. Mutations run
//! under the `<type>:<id>` resource lock; reads are lock-free and served
//! from cache, then index, then file.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::atomic;
use super::index::{IndexManager, IndexRecord};
use super::layout::PlanPaths;
use super::lock::LockManager;
use crate::core::{Result, StoreError};
use crate::model::{EntityKind, PlanRecord};
use crate::query::{sort_documents, QueryOptions, QueryPage, FilterNode};

pub struct EntityRepository<T: PlanRecord> {
    paths: Arc<PlanPaths>,
    index: IndexManager,
    cache: Mutex<LruCache<String, T>>,
    locks: LockManager,
}

impl<T: PlanRecord> EntityRepository<T> {
    pub fn new(paths: Arc<PlanPaths>, locks: LockManager, cache_capacity: NonZeroUsize) -> Self {
        let index = IndexManager::new(paths.index_file(T::KIND));
        Self {
            paths,
            index,
            cache: Mutex::new(LruCache::new(cache_capacity)),
            locks,
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    /// Create directories and load the index.
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.paths.entities_dir()).await?;
        tokio::fs::create_dir_all(self.paths.indexes_dir()).await?;
        self.index.initialize().await
    }

    fn lock_resource(&self, id: &str) -> String {
        format!("{}:{}", T::KIND, id)
    }

    fn index_record(&self, entity: &T) -> IndexRecord {
        IndexRecord::entity(
            T::KIND,
            entity.id(),
            format!("entities/{}-{}.json", T::KIND, entity.id()),
            entity.version(),
            entity.updated_at(),
        )
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn find_by_id(&self, id: &str) -> Result<T> {
        self.find_by_id_opt(id).await?.ok_or_else(|| {
            StoreError::not_found(T::KIND.as_str(), id)
        })
    }

    pub async fn find_by_id_opt(&self, id: &str) -> Result<Option<T>> {
        if let Some(entity) = self.cache.lock().await.get(id) {
            return Ok(Some(entity.clone()));
        }
        let path = self.paths.entity_file(T::KIND, id);
        let Some(entity) = atomic::read_json_opt::<T>(&path).await? else {
            return Ok(None);
        };
        self.cache.lock().await.put(id.to_string(), entity.clone());
        Ok(Some(entity))
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        if self.index.has(id).await {
            return Ok(true);
        }
        // The index trails peer-process writes; fall through to the file.
        Ok(tokio::fs::try_exists(self.paths.entity_file(T::KIND, id)).await?)
    }

    /// Missing ids are skipped, not errors.
    pub async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<T>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.find_by_id_opt(id).await? {
                found.push(entity);
            }
        }
        Ok(found)
    }

    pub async fn find_all(&self) -> Result<Vec<T>> {
        let records = self.index.get_all().await;
        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            match self.find_by_id_opt(&record.id).await? {
                Some(entity) => entities.push(entity),
                None => {
                    tracing::warn!(kind = %T::KIND, id = %record.id, "index record without entity file");
                }
            }
        }
        Ok(entities)
    }

    pub async fn count(&self, filter: Option<&FilterNode>) -> Result<usize> {
        match filter {
            None => Ok(self.index.size().await),
            Some(filter) => {
                let mut count = 0;
                for entity in self.find_all().await? {
                    if filter.matches(&serde_json::to_value(&entity)?) {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }

    pub async fn find_one(&self, filter: &FilterNode) -> Result<Option<T>> {
        for entity in self.find_all().await? {
            if filter.matches(&serde_json::to_value(&entity)?) {
                return Ok(Some(entity));
            }
        }
        Ok(None)
    }

    pub async fn query(&self, options: &QueryOptions) -> Result<QueryPage<T>> {
        let mut rows: Vec<(Value, T)> = Vec::new();
        for entity in self.find_all().await? {
            let document = serde_json::to_value(&entity)?;
            let keep = options
                .filter
                .as_ref()
                .map(|f| f.matches(&document))
                .unwrap_or(true);
            if keep {
                rows.push((document, entity));
            }
        }
        sort_documents(&mut rows, &options.sort);
        let items: Vec<T> = rows.into_iter().map(|(_, entity)| entity).collect();
        Ok(QueryPage::slice(items, options.pagination))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub async fn create(&self, entity: T) -> Result<T> {
        entity.validate_base()?;
        entity.validate()?;
        let id = entity.id().to_string();
        let resource = self.lock_resource(&id);
        self.locks
            .with_lock(&resource, || async {
                if self.index.has(&id).await
                    || tokio::fs::try_exists(self.paths.entity_file(T::KIND, &id)).await?
                {
                    return Err(StoreError::duplicate(T::KIND.as_str(), &id));
                }
                let path = self.paths.entity_file(T::KIND, &id);
                atomic::write_json(&path, &entity).await?;
                self.index.add(self.index_record(&entity)).await?;
                self.cache.lock().await.put(id.clone(), entity.clone());
                tracing::debug!(kind = %T::KIND, id = %id, "entity created");
                Ok(entity)
            })
            .await
    }

    /// Merge `patch` over the stored document. `expected_version` (or a
    /// `version` key inside the patch) triggers the optimistic check.
    pub async fn update(
        &self,
        id: &str,
        mut patch: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> Result<T> {
        let expected_version = expected_version.or_else(|| {
            patch.get("version").and_then(Value::as_u64)
        });
        patch.remove("version");
        let resource = self.lock_resource(id);
        self.locks
            .with_lock(&resource, || async {
                let current = self.load_for_write(id).await?;
                self.check_version(&current, expected_version)?;

                let mut document = match serde_json::to_value(&current)? {
                    Value::Object(map) => map,
                    _ => return Err(StoreError::internal("entity did not serialize to an object")),
                };
                for (key, value) in patch {
                    // Identity and bookkeeping fields never come from the patch.
                    if matches!(key.as_str(), "id" | "type" | "createdAt" | "updatedAt") {
                        continue;
                    }
                    document.insert(key, value);
                }
                let mut updated: T = serde_json::from_value(Value::Object(document))
                    .map_err(|e| StoreError::validation("patch", format!("patch does not fit entity shape: {}", e)))?;
                updated.set_version(current.version() + 1);
                updated.touch(Utc::now());
                updated.validate()?;

                self.commit_update(id, &updated).await?;
                Ok(updated)
            })
            .await
    }

    /// Closure-based update for read-modify-write actions (vote counts,
    /// status demotions, supersede backpointers) that must not race.
    pub async fn mutate<F>(&self, id: &str, expected_version: Option<u64>, apply: F) -> Result<T>
    where
        F: FnOnce(&mut T) -> Result<()>,
    {
        let resource = self.lock_resource(id);
        self.locks
            .with_lock(&resource, || async {
                let current = self.load_for_write(id).await?;
                self.check_version(&current, expected_version)?;
                let mut updated = current.clone();
                apply(&mut updated)?;
                updated.set_version(current.version() + 1);
                updated.touch(Utc::now());
                updated.validate()?;
                self.commit_update(id, &updated).await?;
                Ok(updated)
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let resource = self.lock_resource(id);
        self.locks
            .with_lock(&resource, || async {
                let path = self.paths.entity_file(T::KIND, id);
                let in_index = self.index.has(id).await;
                let on_disk = tokio::fs::try_exists(&path).await?;
                if !in_index && !on_disk {
                    return Err(StoreError::not_found(T::KIND.as_str(), id));
                }
                // Best-effort: an index record without a file still deletes.
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
                self.index.delete(id).await?;
                self.cache.lock().await.pop(id);
                tracing::debug!(kind = %T::KIND, id = %id, "entity deleted");
                Ok(())
            })
            .await
    }

    // ------------------------------------------------------------------
    // Bulk operations (sequential; not transactional across types)
    // ------------------------------------------------------------------

    /// Best-effort atomic: on failure, entities created so far are deleted
    /// in reverse order and rollback failures are swallowed.
    pub async fn create_many(&self, entities: Vec<T>) -> Result<Vec<T>> {
        let mut created: Vec<T> = Vec::with_capacity(entities.len());
        for entity in entities {
            match self.create(entity).await {
                Ok(entity) => created.push(entity),
                Err(e) => {
                    for rollback in created.iter().rev() {
                        if let Err(undo) = self.delete(rollback.id()).await {
                            tracing::warn!(
                                kind = %T::KIND,
                                id = %rollback.id(),
                                error = %undo,
                                "createMany rollback failed"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// Sequential updates, no rollback; the first failure aborts.
    pub async fn update_many(
        &self,
        updates: Vec<(String, Map<String, Value>, Option<u64>)>,
    ) -> Result<Vec<T>> {
        let mut updated = Vec::with_capacity(updates.len());
        for (id, patch, expected_version) in updates {
            updated.push(self.update(&id, patch, expected_version).await?);
        }
        Ok(updated)
    }

    /// Tolerant: returns how many ids were actually removed.
    pub async fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            match self.delete(id).await {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Create-or-replace per entity. A version mismatch aborts at the
    /// failing entity; earlier upserts are kept.
    pub async fn upsert_many(&self, entities: Vec<T>) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity.id().to_string();
            if self.exists(&id).await? {
                let expected = Some(entity.version());
                let mut patch = match serde_json::to_value(&entity)? {
                    Value::Object(map) => map,
                    _ => return Err(StoreError::internal("entity did not serialize to an object")),
                };
                patch.remove("version");
                results.push(self.update(&id, patch, expected).await?);
            } else {
                results.push(self.create(entity).await?);
            }
        }
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn load_for_write(&self, id: &str) -> Result<T> {
        let path = self.paths.entity_file(T::KIND, id);
        atomic::read_json_opt::<T>(&path)
            .await?
            .ok_or_else(|| StoreError::not_found(T::KIND.as_str(), id))
    }

    fn check_version(&self, current: &T, expected: Option<u64>) -> Result<()> {
        if let Some(expected) = expected {
            if expected != current.version() {
                return Err(StoreError::VersionConflict {
                    entity_type: T::KIND.as_str().to_string(),
                    id: current.id().to_string(),
                    expected,
                    actual: current.version(),
                });
            }
        }
        Ok(())
    }

    async fn commit_update(&self, id: &str, updated: &T) -> Result<()> {
        let path = self.paths.entity_file(T::KIND, id);
        atomic::write_json(&path, updated).await?;
        self.index.update(self.index_record(updated)).await?;
        self.cache.lock().await.pop(id);
        tracing::debug!(kind = %T::KIND, id = %id, version = updated.version(), "entity updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LockConfig;
    use crate::model::{Requirement, RequirementDraft};
    use crate::storage::layout::StoreLayout;
    use serde_json::json;
    use tempfile::TempDir;

    async fn repo(dir: &TempDir) -> EntityRepository<Requirement> {
        let layout = StoreLayout::new(dir.path());
        let paths = Arc::new(layout.plan_paths("proj", "plan"));
        let locks = LockManager::new(paths.locks_dir(), LockConfig::default());
        locks.initialize().await.unwrap();
        let repo = EntityRepository::new(
            paths,
            locks,
            NonZeroUsize::new(8).unwrap(),
        );
        repo.initialize().await.unwrap();
        repo
    }

    fn draft(title: &str) -> Requirement {
        RequirementDraft::new(title, "description")
            .into_requirement()
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        let created = repo.create(draft("round trip")).await.unwrap();

        let loaded = repo.find_by_id(created.id()).await.unwrap();
        assert_eq!(loaded, created);
        assert!(repo.exists(created.id()).await.unwrap());
        assert!(repo.find_by_id_opt("missing").await.unwrap().is_none());
        assert!(matches!(
            repo.find_by_id("missing").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn update_merges_patch_and_bumps_version() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        let created = repo.create(draft("before")).await.unwrap();

        let mut patch = Map::new();
        patch.insert("title".to_string(), json!("after"));
        // Identity fields in a patch are ignored, not applied.
        patch.insert("id".to_string(), json!("hijack"));
        let updated = repo.update(created.id(), patch, None).await.unwrap();

        assert_eq!(updated.title, "after");
        assert_eq!(updated.id(), created.id());
        assert_eq!(updated.version(), 2);
        assert!(updated.updated_at() >= created.updated_at());
    }

    #[tokio::test]
    async fn patch_that_breaks_the_shape_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        let created = repo.create(draft("typed")).await.unwrap();

        let mut patch = Map::new();
        patch.insert("votes".to_string(), json!("not a number"));
        let err = repo.update(created.id(), patch, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // Nothing was committed.
        assert_eq!(repo.find_by_id(created.id()).await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn create_many_rolls_back_on_mid_batch_failure() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;

        let good = draft("good");
        let mut bad = draft("bad");
        bad.title = String::new(); // fails validation inside create

        let err = repo.create_many(vec![good, bad]).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(repo.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_many_creates_then_replaces() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        let created = repo.upsert_many(vec![draft("v1")]).await.unwrap();
        assert_eq!(created[0].version(), 1);

        let mut replacement = created[0].clone();
        replacement.title = "v2".to_string();
        let upserted = repo.upsert_many(vec![replacement]).await.unwrap();
        assert_eq!(upserted[0].title, "v2");
        assert_eq!(upserted[0].version(), 2);

        // A stale carried version aborts at the failing entity.
        let mut stale = created[0].clone();
        stale.title = "v3".to_string(); // still carries version 1
        let err = repo.upsert_many(vec![stale]).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn delete_many_is_tolerant_of_missing_ids() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        let a = repo.create(draft("a")).await.unwrap();
        let b = repo.create(draft("b")).await.unwrap();

        let removed = repo
            .delete_many(&[
                a.id().to_string(),
                "ghost".to_string(),
                b.id().to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_one_returns_first_match_or_none() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        repo.create(draft("needle")).await.unwrap();
        repo.create(draft("hay")).await.unwrap();

        let found = repo
            .find_one(&FilterNode::eq("title", "needle"))
            .await
            .unwrap();
        assert_eq!(found.unwrap().title, "needle");

        let none = repo
            .find_one(&FilterNode::eq("title", "thimble"))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn cache_serves_repeat_reads_and_invalidates_on_delete() {
        let dir = TempDir::new().unwrap();
        let repo = repo(&dir).await;
        let created = repo.create(draft("cached")).await.unwrap();

        // Remove the backing file; the cache still answers.
        let path = dir
            .path()
            .join("proj/plans/plan/entities")
            .join(format!("requirement-{}.json", created.id()));
        std::fs::remove_file(&path).unwrap();
        assert!(repo.find_by_id_opt(created.id()).await.unwrap().is_some());

        // Delete drops the cache entry too (missing file is tolerated).
        repo.delete(created.id()).await.unwrap();
        assert!(repo.find_by_id_opt(created.id()).await.unwrap().is_none());
    }
}
