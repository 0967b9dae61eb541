//! Repository for relation edges. Same machinery as the entity repository,
//! specialized for composite-key uniqueness: the create path locks the
//! `(source, target, relation)` triple, not the edge id, closing the gap
//! between the duplicate check and the write.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;

use super::atomic;
use super::index::{IndexManager, IndexRecord};
use super::layout::PlanPaths;
use super::lock::LockManager;
use crate::core::{Result, StoreError};
use crate::model::{EntityKind, Link, LinkDraft, RelationType};

/// Which side of an entity `find_links_by_entity` should scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Incoming,
    Outgoing,
    Both,
}

pub struct LinkRepository {
    paths: Arc<PlanPaths>,
    index: IndexManager,
    cache: Mutex<LruCache<String, Link>>,
    locks: LockManager,
}

impl LinkRepository {
    pub fn new(paths: Arc<PlanPaths>, locks: LockManager, cache_capacity: NonZeroUsize) -> Self {
        let index = IndexManager::new(paths.index_file(EntityKind::Link));
        Self {
            paths,
            index,
            cache: Mutex::new(LruCache::new(cache_capacity)),
            locks,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.paths.links_dir()).await?;
        tokio::fs::create_dir_all(self.paths.indexes_dir()).await?;
        self.index.initialize().await
    }

    fn index_record(link: &Link) -> IndexRecord {
        IndexRecord {
            id: link.id.clone(),
            kind: EntityKind::Link,
            file_path: format!("links/{}.json", link.id),
            version: 1,
            updated_at: link.created_at,
            source_id: Some(link.source_id.clone()),
            target_id: Some(link.target_id.clone()),
            relation_type: Some(link.relation_type),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_link_by_id(&self, id: &str) -> Result<Link> {
        self.get_link_opt(id)
            .await?
            .ok_or_else(|| StoreError::not_found("link", id))
    }

    pub async fn get_link_opt(&self, id: &str) -> Result<Option<Link>> {
        if let Some(link) = self.cache.lock().await.get(id) {
            return Ok(Some(link.clone()));
        }
        let Some(link) = atomic::read_json_opt::<Link>(&self.paths.link_file(id)).await? else {
            return Ok(None);
        };
        self.cache.lock().await.put(id.to_string(), link.clone());
        Ok(Some(link))
    }

    pub async fn find_links_by_source(
        &self,
        source_id: &str,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Link>> {
        self.collect(|record| {
            record.source_id.as_deref() == Some(source_id)
                && relation_type.is_none_or(|r| record.relation_type == Some(r))
        })
        .await
    }

    pub async fn find_links_by_target(
        &self,
        target_id: &str,
        relation_type: Option<RelationType>,
    ) -> Result<Vec<Link>> {
        self.collect(|record| {
            record.target_id.as_deref() == Some(target_id)
                && relation_type.is_none_or(|r| record.relation_type == Some(r))
        })
        .await
    }

    pub async fn find_links_by_entity(
        &self,
        entity_id: &str,
        direction: LinkDirection,
    ) -> Result<Vec<Link>> {
        self.collect(|record| {
            let outgoing = record.source_id.as_deref() == Some(entity_id);
            let incoming = record.target_id.as_deref() == Some(entity_id);
            match direction {
                LinkDirection::Outgoing => outgoing,
                LinkDirection::Incoming => incoming,
                LinkDirection::Both => outgoing || incoming,
            }
        })
        .await
    }

    pub async fn find_all_links(&self, relation_type: Option<RelationType>) -> Result<Vec<Link>> {
        self.collect(|record| relation_type.is_none_or(|r| record.relation_type == Some(r)))
            .await
    }

    pub async fn link_exists(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Result<bool> {
        Ok(self.find_composite(source_id, target_id, relation_type).await.is_some())
    }

    pub async fn count(&self) -> usize {
        self.index.size().await
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub async fn create_link(&self, draft: LinkDraft) -> Result<Link> {
        draft.validate()?;
        let key = Link::composite_key(&draft.source_id, &draft.target_id, draft.relation_type);
        let resource = format!("link:{}", key);
        self.locks
            .with_lock(&resource, || async {
                if self
                    .find_composite(&draft.source_id, &draft.target_id, draft.relation_type)
                    .await
                    .is_some()
                {
                    return Err(StoreError::duplicate("link", &key));
                }
                let link = draft.into_link()?;
                atomic::write_json(&self.paths.link_file(&link.id), &link).await?;
                self.index.add(Self::index_record(&link)).await?;
                self.cache.lock().await.put(link.id.clone(), link.clone());
                tracing::debug!(link = %link.id, key = %key, "link created");
                Ok(link)
            })
            .await
    }

    pub async fn delete_link(&self, id: &str) -> Result<()> {
        let resource = format!("link:{}", id);
        self.locks
            .with_lock(&resource, || async {
                // Re-check inside the lock: a concurrent delete may have won.
                let in_index = self.index.has(id).await;
                let path = self.paths.link_file(id);
                let on_disk = tokio::fs::try_exists(&path).await?;
                if !in_index && !on_disk {
                    return Err(StoreError::not_found("link", id));
                }
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
                self.index.delete(id).await?;
                self.cache.lock().await.pop(id);
                tracing::debug!(link = %id, "link deleted");
                Ok(())
            })
            .await
    }

    /// Remove every edge touching the entity, each under its own lock.
    /// Returns how many were actually removed.
    pub async fn delete_links_for_entity(&self, entity_id: &str) -> Result<usize> {
        let touching = self
            .find_links_by_entity(entity_id, LinkDirection::Both)
            .await?;
        let mut removed = 0;
        for link in touching {
            match self.delete_link(&link.id).await {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Tolerant bulk delete; counts actual successes.
    pub async fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            match self.delete_link(id).await {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn find_composite(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Option<String> {
        self.index
            .get_all()
            .await
            .into_iter()
            .find(|record| {
                record.source_id.as_deref() == Some(source_id)
                    && record.target_id.as_deref() == Some(target_id)
                    && record.relation_type == Some(relation_type)
            })
            .map(|record| record.id)
    }

    async fn collect<F>(&self, keep: F) -> Result<Vec<Link>>
    where
        F: Fn(&IndexRecord) -> bool,
    {
        let mut links = Vec::new();
        for record in self.index.get_all().await {
            if !keep(&record) {
                continue;
            }
            match self.get_link_opt(&record.id).await? {
                Some(link) => links.push(link),
                None => {
                    tracing::warn!(link = %record.id, "link index record without file");
                }
            }
        }
        Ok(links)
    }
}
