//! Requirement actions: CRUD, voting, history.

use super::context::PlanContext;
use crate::core::{Result, StoreError};
use crate::model::{
    patch_to_map, EntityKind, PlanRecord, Requirement, RequirementDraft, RequirementPatch,
};
use crate::query::{QueryOptions, QueryPage};
use crate::storage::{EntityHistory, FieldChange};

pub const GET_MANY_LIMIT: usize = 100;

#[derive(Clone)]
pub struct RequirementService {
    ctx: PlanContext,
}

impl RequirementService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    pub async fn add(&self, draft: RequirementDraft) -> Result<Requirement> {
        self.ctx.ensure_writable()?;
        let requirement = draft.into_requirement()?;
        let created = self.ctx.inner.requirements.create(requirement).await?;
        self.ctx.refresh_statistics().await?;
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Requirement> {
        self.ctx.inner.requirements.find_by_id(id).await
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Requirement>> {
        if ids.len() > GET_MANY_LIMIT {
            return Err(StoreError::too_many_ids(GET_MANY_LIMIT));
        }
        self.ctx.inner.requirements.find_by_ids(ids).await
    }

    pub async fn update(&self, id: &str, patch: RequirementPatch) -> Result<Requirement> {
        self.ctx.ensure_writable()?;
        let current = self.ctx.inner.requirements.find_by_id(id).await?;
        self.ctx.record_history(&current, None).await?;
        let expected = patch.version;
        let map = patch_to_map(&patch)?;
        self.ctx.inner.requirements.update(id, map, expected).await
    }

    pub async fn list(&self, options: QueryOptions) -> Result<QueryPage<Requirement>> {
        self.ctx.inner.requirements.query(&options).await
    }

    /// Deleting a requirement also removes every link touching it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ctx.ensure_writable()?;
        self.ctx.inner.requirements.delete(id).await?;
        let removed = self.ctx.inner.links.delete_links_for_entity(id).await?;
        if removed > 0 {
            tracing::debug!(requirement = %id, links = removed, "cascaded link deletes");
        }
        self.ctx.refresh_statistics().await?;
        Ok(())
    }

    pub async fn vote(&self, id: &str) -> Result<Requirement> {
        self.ctx.ensure_writable()?;
        let current = self.ctx.inner.requirements.find_by_id(id).await?;
        self.ctx.record_history(&current, Some("vote".into())).await?;
        self.ctx
            .inner
            .requirements
            .mutate(id, None, |requirement| {
                requirement.votes = requirement.votes.saturating_add(1);
                Ok(())
            })
            .await
    }

    /// Votes never drop below zero.
    pub async fn unvote(&self, id: &str) -> Result<Requirement> {
        self.ctx.ensure_writable()?;
        let current = self.ctx.inner.requirements.find_by_id(id).await?;
        self.ctx.record_history(&current, Some("unvote".into())).await?;
        self.ctx
            .inner
            .requirements
            .mutate(id, None, |requirement| {
                requirement.votes = requirement.votes.saturating_sub(1);
                Ok(())
            })
            .await
    }

    /// Zero every requirement's votes. Each touched requirement's version
    /// bumps by one; untouched (already zero) requirements are skipped.
    pub async fn reset_all_votes(&self) -> Result<usize> {
        self.ctx.ensure_writable()?;
        let all = self.ctx.inner.requirements.find_all().await?;
        let mut reset = 0;
        for requirement in all {
            if requirement.votes == 0 {
                continue;
            }
            self.ctx
                .record_history(&requirement, Some("reset_all_votes".into()))
                .await?;
            self.ctx
                .inner
                .requirements
                .mutate(requirement.id(), None, |r| {
                    r.votes = 0;
                    Ok(())
                })
                .await?;
            reset += 1;
        }
        Ok(reset)
    }

    pub async fn get_history(&self, id: &str) -> Result<EntityHistory> {
        self.ctx.entity_history(EntityKind::Requirement, id).await
    }

    pub async fn diff(&self, id: &str, v1: u64, v2: u64) -> Result<Vec<FieldChange>> {
        self.ctx.entity_diff(EntityKind::Requirement, id, v1, v2).await
    }

    pub fn list_fields(&self) -> &'static [&'static str] {
        EntityKind::Requirement.field_names()
    }
}
