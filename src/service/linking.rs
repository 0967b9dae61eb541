//! Link creation with referential integrity: both endpoints must exist in
//! the plan, self-links are rejected, and `depends_on` edges are refused
//! when they would close a cycle.

use std::collections::{HashMap, HashSet};

use super::context::PlanContext;
use crate::core::{Result, StoreError};
use crate::model::{Link, LinkDraft, RelationType};
use crate::storage::LinkDirection;

#[derive(Clone)]
pub struct LinkingService {
    ctx: PlanContext,
}

impl LinkingService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, draft: LinkDraft) -> Result<Link> {
        self.ctx.ensure_writable()?;
        draft.validate()?;

        if draft.source_id == draft.target_id {
            return Err(StoreError::Integrity(
                "self-links are not allowed".to_string(),
            ));
        }
        if self.ctx.entity_kind_of(&draft.source_id).await?.is_none() {
            return Err(StoreError::Integrity(format!(
                "link source '{}' does not exist in this plan",
                draft.source_id
            )));
        }
        if self.ctx.entity_kind_of(&draft.target_id).await?.is_none() {
            return Err(StoreError::Integrity(format!(
                "link target '{}' does not exist in this plan",
                draft.target_id
            )));
        }
        if draft.relation_type == RelationType::DependsOn {
            self.reject_dependency_cycle(&draft.source_id, &draft.target_id)
                .await?;
        }

        self.ctx.inner.links.create_link(draft).await
    }

    pub async fn get(&self, id: &str) -> Result<Link> {
        self.ctx.inner.links.get_link_by_id(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ctx.ensure_writable()?;
        self.ctx.inner.links.delete_link(id).await
    }

    pub async fn links_for_entity(&self, entity_id: &str, direction: LinkDirection) -> Result<Vec<Link>> {
        self.ctx.inner.links.find_links_by_entity(entity_id, direction).await
    }

    /// DFS over the current `depends_on` subgraph plus the proposed edge.
    async fn reject_dependency_cycle(&self, source_id: &str, target_id: &str) -> Result<()> {
        let existing = self
            .ctx
            .inner
            .links
            .find_all_links(Some(RelationType::DependsOn))
            .await?;
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for link in &existing {
            adjacency
                .entry(link.source_id.as_str())
                .or_default()
                .push(link.target_id.as_str());
        }

        // Adding source→target closes a cycle iff source is reachable from
        // target along existing edges.
        let mut stack = vec![target_id];
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == source_id {
                return Err(StoreError::Integrity(
                    "Circular dependency detected".to_string(),
                ));
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(next) = adjacency.get(node) {
                stack.extend(next.iter().copied());
            }
        }
        Ok(())
    }
}
