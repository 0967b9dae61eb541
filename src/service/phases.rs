//! Phase actions: tree-shaped CRUD, status transitions, reparenting, and
//! next-action planning. Phases reference each other by id only; the tree
//! is rebuilt on demand from the flat `parentId` fields.

use async_recursion::async_recursion;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::context::PlanContext;
use crate::core::{Result, StoreError};
use crate::model::{
    patch_to_map, validate_order, Annotation, EffortEstimate, EntityKind, Phase, PhaseDraft,
    PhasePatch, PhaseStatus, PlanRecord, MAX_ORDER,
};
use crate::query::{QueryOptions, QueryPage};
use crate::storage::{EntityHistory, FieldChange};

pub const GET_MANY_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTreeNode {
    pub phase: Phase,
    pub children: Vec<PhaseTreeNode>,
}

/// Where `move` should put the phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentChange {
    Keep,
    Root,
    To(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: PhaseStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actual_effort: Option<EffortEstimate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteAndAdvance {
    pub completed: Phase,
    pub next_actions: Vec<Phase>,
}

#[derive(Clone)]
pub struct PhaseService {
    ctx: PlanContext,
}

impl PhaseService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    pub async fn add(&self, draft: PhaseDraft) -> Result<Phase> {
        self.ctx.ensure_writable()?;
        let parent = match &draft.parent_id {
            Some(parent_id) => Some(self.require_phase(parent_id).await?),
            None => None,
        };
        let siblings = self.children_of(draft.parent_id.as_deref()).await?;
        let order = match draft.order {
            Some(order) => {
                validate_order(order)?;
                self.ensure_order_free(&siblings, order, None)?;
                order
            }
            None => next_order(&siblings)?,
        };
        let parent_base = parent.as_ref().map(|p| (p.path.as_str(), p.depth));
        let phase = draft.into_phase(order, parent_base)?;
        let created = self.ctx.inner.phases.create(phase).await?;
        self.ctx.refresh_statistics().await?;
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Phase> {
        self.ctx.inner.phases.find_by_id(id).await
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Phase>> {
        if ids.len() > GET_MANY_LIMIT {
            return Err(StoreError::too_many_ids(GET_MANY_LIMIT));
        }
        self.ctx.inner.phases.find_by_ids(ids).await
    }

    /// The whole phase tree, siblings ordered by `order`.
    pub async fn get_tree(&self) -> Result<Vec<PhaseTreeNode>> {
        let mut all = self.ctx.inner.phases.find_all().await?;
        all.sort_by_key(|phase| phase.order);
        Ok(build_forest(&all, None))
    }

    pub async fn update(&self, id: &str, patch: PhasePatch) -> Result<Phase> {
        self.ctx.ensure_writable()?;
        let current = self.ctx.inner.phases.find_by_id(id).await?;
        self.ctx.record_history(&current, None).await?;
        let expected = patch.version;
        let map = patch_to_map(&patch)?;
        self.ctx.inner.phases.update(id, map, expected).await
    }

    pub async fn update_status(&self, id: &str, update: StatusUpdate) -> Result<Phase> {
        self.ctx.ensure_writable()?;
        if let Some(progress) = update.progress {
            if progress > 100 {
                return Err(StoreError::validation(
                    "progress",
                    "progress must be within [0, 100]",
                ));
            }
        }
        let current = self.ctx.inner.phases.find_by_id(id).await?;
        self.ctx.record_history(&current, Some("status".into())).await?;
        self.ctx
            .inner
            .phases
            .mutate(id, None, move |phase| {
                phase.status = update.status;
                match update.progress {
                    Some(progress) => phase.progress = progress,
                    None => {
                        if update.status == PhaseStatus::Completed {
                            phase.progress = 100;
                        }
                    }
                }
                if let Some(text) = update.notes {
                    phase.notes.push(Annotation {
                        created_at: Utc::now(),
                        text,
                    });
                }
                if let Some(effort) = update.actual_effort {
                    phase.actual_effort = Some(effort);
                }
                Ok(())
            })
            .await
    }

    /// Reparent and/or reorder. Without an explicit order the phase lands
    /// after the last sibling under its new parent. The whole subtree's
    /// paths and depths are recomputed.
    pub async fn move_phase(
        &self,
        id: &str,
        parent_change: ParentChange,
        new_order: Option<u32>,
    ) -> Result<Phase> {
        self.ctx.ensure_writable()?;
        let current = self.ctx.inner.phases.find_by_id(id).await?;

        let new_parent_id = match &parent_change {
            ParentChange::Keep => current.parent_id.clone(),
            ParentChange::Root => None,
            ParentChange::To(parent_id) => {
                if parent_id == id {
                    return Err(StoreError::Integrity(
                        "a phase cannot be its own parent".to_string(),
                    ));
                }
                let parent = self.require_phase(parent_id).await?;
                if self.is_descendant_of(&parent, id).await? {
                    return Err(StoreError::Integrity(
                        "cannot move a phase under its own subtree".to_string(),
                    ));
                }
                Some(parent_id.clone())
            }
        };

        let siblings = self.children_of(new_parent_id.as_deref()).await?;
        let order = match new_order {
            Some(order) => {
                validate_order(order)?;
                self.ensure_order_free(&siblings, order, Some(id))?;
                order
            }
            None => next_order_excluding(&siblings, id)?,
        };

        let parent_base = match &new_parent_id {
            Some(parent_id) => {
                let parent = self.require_phase(parent_id).await?;
                Some((parent.path.clone(), parent.depth))
            }
            None => None,
        };

        self.ctx.record_history(&current, Some("move".into())).await?;
        let parent_for_mutate = new_parent_id.clone();
        let moved = self
            .ctx
            .inner
            .phases
            .mutate(id, None, move |phase| {
                phase.parent_id = parent_for_mutate;
                phase.order = order;
                phase.rebase(parent_base.as_ref().map(|(p, d)| (p.as_str(), *d)));
                Ok(())
            })
            .await?;

        self.rebase_children(id, &moved.path, moved.depth).await?;
        Ok(moved)
    }

    /// Delete a phase. With `delete_children` the whole subtree goes;
    /// otherwise each child is reparented to the deleted phase's parent
    /// with a fresh sane order.
    pub async fn delete(&self, id: &str, delete_children: bool) -> Result<()> {
        self.ctx.ensure_writable()?;
        let phase = self.ctx.inner.phases.find_by_id(id).await?;
        let children = self.children_of(Some(id)).await?;

        if delete_children {
            for child in &children {
                self.delete_subtree(child.id()).await?;
            }
        } else {
            let new_parent_id = phase.parent_id.clone();
            let parent_base = match &new_parent_id {
                Some(parent_id) => {
                    let parent = self.require_phase(parent_id).await?;
                    Some((parent.path.clone(), parent.depth))
                }
                None => None,
            };
            let mut siblings = self.children_of(new_parent_id.as_deref()).await?;
            siblings.retain(|sibling| sibling.id() != id);

            for child in &children {
                let order = next_order(&siblings)?;
                let parent_for_mutate = new_parent_id.clone();
                let base = parent_base.clone();
                let reparented = self
                    .ctx
                    .inner
                    .phases
                    .mutate(child.id(), None, move |phase| {
                        phase.parent_id = parent_for_mutate;
                        phase.order = order;
                        phase.rebase(base.as_ref().map(|(p, d)| (p.as_str(), *d)));
                        Ok(())
                    })
                    .await?;
                self.rebase_children(child.id(), &reparented.path, reparented.depth)
                    .await?;
                siblings.push(reparented);
            }
        }

        self.ctx.inner.phases.delete(id).await?;
        self.ctx.inner.links.delete_links_for_entity(id).await?;
        self.ctx.refresh_statistics().await?;
        Ok(())
    }

    /// Leaf phases that are ready to work on, highest priority first, then
    /// tree order.
    pub async fn get_next_actions(&self) -> Result<Vec<Phase>> {
        let all = self.ctx.inner.phases.find_all().await?;
        let mut leaves: Vec<Phase> = all
            .iter()
            .filter(|phase| {
                matches!(phase.status, PhaseStatus::Planned | PhaseStatus::InProgress)
                    && !all
                        .iter()
                        .any(|other| other.parent_id.as_deref() == Some(phase.id()))
            })
            .cloned()
            .collect();
        leaves.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.order.cmp(&b.order))
        });
        Ok(leaves)
    }

    pub async fn complete_and_advance(&self, id: &str) -> Result<CompleteAndAdvance> {
        let completed = self
            .update_status(
                id,
                StatusUpdate {
                    status: PhaseStatus::Completed,
                    progress: Some(100),
                    notes: None,
                    actual_effort: None,
                },
            )
            .await?;
        let next_actions = self.get_next_actions().await?;
        Ok(CompleteAndAdvance {
            completed,
            next_actions,
        })
    }

    pub async fn get_history(&self, id: &str) -> Result<EntityHistory> {
        self.ctx.entity_history(EntityKind::Phase, id).await
    }

    pub async fn diff(&self, id: &str, v1: u64, v2: u64) -> Result<Vec<FieldChange>> {
        self.ctx.entity_diff(EntityKind::Phase, id, v1, v2).await
    }

    pub fn list_fields(&self) -> &'static [&'static str] {
        EntityKind::Phase.field_names()
    }

    pub async fn list(&self, options: QueryOptions) -> Result<QueryPage<Phase>> {
        self.ctx.inner.phases.query(&options).await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn require_phase(&self, id: &str) -> Result<Phase> {
        self.ctx.inner.phases.find_by_id_opt(id).await?.ok_or_else(|| {
            StoreError::Integrity(format!("referenced phase '{}' does not exist", id))
        })
    }

    async fn children_of(&self, parent_id: Option<&str>) -> Result<Vec<Phase>> {
        let all = self.ctx.inner.phases.find_all().await?;
        Ok(all
            .into_iter()
            .filter(|phase| phase.parent_id.as_deref() == parent_id)
            .collect())
    }

    fn ensure_order_free(
        &self,
        siblings: &[Phase],
        order: u32,
        moving_id: Option<&str>,
    ) -> Result<()> {
        let taken = siblings
            .iter()
            .any(|sibling| sibling.order == order && Some(sibling.id()) != moving_id);
        if taken {
            return Err(StoreError::validation(
                "order",
                format!("a sibling phase already has order {}", order),
            ));
        }
        Ok(())
    }

    async fn is_descendant_of(&self, candidate: &Phase, ancestor_id: &str) -> Result<bool> {
        let mut current = candidate.parent_id.clone();
        while let Some(parent_id) = current {
            if parent_id == ancestor_id {
                return Ok(true);
            }
            current = self
                .ctx
                .inner
                .phases
                .find_by_id_opt(&parent_id)
                .await?
                .and_then(|phase| phase.parent_id);
        }
        Ok(false)
    }

    /// Recompute `path`/`depth` for every descendant after a move.
    #[async_recursion]
    async fn rebase_children(&self, parent_id: &str, parent_path: &str, parent_depth: u32) -> Result<()> {
        for child in self.children_of(Some(parent_id)).await? {
            let base = (parent_path.to_string(), parent_depth);
            let rebased = self
                .ctx
                .inner
                .phases
                .mutate(child.id(), None, move |phase| {
                    phase.rebase(Some((base.0.as_str(), base.1)));
                    Ok(())
                })
                .await?;
            self.rebase_children(child.id(), &rebased.path, rebased.depth)
                .await?;
        }
        Ok(())
    }

    /// Depth-first delete of a whole subtree, leaves first.
    #[async_recursion]
    async fn delete_subtree(&self, id: &str) -> Result<()> {
        for child in self.children_of(Some(id)).await? {
            self.delete_subtree(child.id()).await?;
        }
        self.ctx.inner.phases.delete(id).await?;
        self.ctx.inner.links.delete_links_for_entity(id).await?;
        Ok(())
    }
}

fn build_forest(all: &[Phase], parent_id: Option<&str>) -> Vec<PhaseTreeNode> {
    all.iter()
        .filter(|phase| phase.parent_id.as_deref() == parent_id)
        .map(|phase| PhaseTreeNode {
            phase: phase.clone(),
            children: build_forest(all, Some(phase.id())),
        })
        .collect()
}

/// Next free order under a parent: one past the current maximum, falling
/// back to the smallest unused slot when the maximum is already at the
/// ceiling. Orders stay within [1, MAX_ORDER], never magic sentinels.
fn next_order(siblings: &[Phase]) -> Result<u32> {
    let max = siblings.iter().map(|phase| phase.order).max().unwrap_or(0);
    if max < MAX_ORDER {
        return Ok(max + 1);
    }
    let taken: std::collections::HashSet<u32> =
        siblings.iter().map(|phase| phase.order).collect();
    (1..=MAX_ORDER)
        .find(|order| !taken.contains(order))
        .ok_or_else(|| {
            StoreError::Integrity("no free sibling order slot available".to_string())
        })
}

fn next_order_excluding(siblings: &[Phase], moving_id: &str) -> Result<u32> {
    let rest: Vec<Phase> = siblings
        .iter()
        .filter(|phase| phase.id() != moving_id)
        .cloned()
        .collect();
    next_order(&rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhaseDraft;

    fn phase_with_order(order: u32) -> Phase {
        PhaseDraft::new(format!("phase-{}", order))
            .into_phase(order, None)
            .unwrap()
    }

    #[test]
    fn next_order_is_max_plus_one() {
        let siblings = vec![phase_with_order(3), phase_with_order(10)];
        assert_eq!(next_order(&siblings).unwrap(), 11);
        assert_eq!(next_order(&[]).unwrap(), 1);
    }

    #[test]
    fn next_order_falls_back_to_smallest_gap_at_ceiling() {
        let siblings = vec![phase_with_order(MAX_ORDER), phase_with_order(2)];
        assert_eq!(next_order(&siblings).unwrap(), 1);
    }

    #[test]
    fn forest_nests_by_parent() {
        let mut root = phase_with_order(1);
        root.core.id = "root".into();
        let mut child = PhaseDraft::new("child")
            .parent("root")
            .into_phase(1, Some(("1", 0)))
            .unwrap();
        child.core.id = "child".into();

        let forest = build_forest(&[root, child], None);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].phase.path, "1.1");
    }
}
