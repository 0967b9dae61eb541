//! Artifact actions. Slugs are derived from titles when absent and must be
//! unique within the plan; list results are projected documents that never
//! include `content.sourceCode`.

use serde_json::Value;

use super::context::PlanContext;
use super::slug::slugify;
use crate::core::{Result, StoreError};
use crate::model::{patch_to_map, Artifact, ArtifactDraft, ArtifactPatch, EntityKind, PlanRecord};
use crate::query::{lookup, QueryOptions, QueryPage};
use crate::storage::{EntityHistory, FieldChange};

#[derive(Clone)]
pub struct ArtifactService {
    ctx: PlanContext,
}

impl ArtifactService {
    pub(crate) fn new(ctx: PlanContext) -> Self {
        Self { ctx }
    }

    pub async fn add(&self, draft: ArtifactDraft) -> Result<Artifact> {
        self.ctx.ensure_writable()?;
        if let Some(phase_id) = &draft.related_phase_id {
            if !self.ctx.inner.phases.exists(phase_id).await? {
                return Err(StoreError::Integrity(format!(
                    "relatedPhaseId references missing phase '{}'",
                    phase_id
                )));
            }
        }
        let slug = match &draft.slug {
            Some(explicit) => slugify(explicit),
            None => slugify(&draft.title),
        };
        if slug.is_empty() {
            return Err(StoreError::validation(
                "slug",
                "title yields an empty slug; provide one explicitly",
            ));
        }
        self.ensure_slug_free(&slug, None).await?;
        let artifact = draft.into_artifact(slug)?;
        let created = self.ctx.inner.artifacts.create(artifact).await?;
        self.ctx.refresh_statistics().await?;
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Artifact> {
        let mut artifact = self.ctx.inner.artifacts.find_by_id(id).await?;
        artifact.migrate_legacy_fields();
        Ok(artifact)
    }

    pub async fn update(&self, id: &str, patch: ArtifactPatch) -> Result<Artifact> {
        self.ctx.ensure_writable()?;
        if let Some(phase_id) = &patch.related_phase_id {
            if !self.ctx.inner.phases.exists(phase_id).await? {
                return Err(StoreError::Integrity(format!(
                    "relatedPhaseId references missing phase '{}'",
                    phase_id
                )));
            }
        }
        let current = self.ctx.inner.artifacts.find_by_id(id).await?;
        self.ctx.record_history(&current, None).await?;
        let expected = patch.version;
        let map = patch_to_map(&patch)?;
        self.ctx.inner.artifacts.update(id, map, expected).await
    }

    /// Projected list. `fields` restricts each returned document to the
    /// named (dotted) paths; with or without projection, `content.sourceCode`
    /// is never part of a list result.
    pub async fn list(
        &self,
        options: QueryOptions,
        fields: Option<&[String]>,
    ) -> Result<QueryPage<Value>> {
        let page = self.ctx.inner.artifacts.query(&options).await?;
        let mut items = Vec::with_capacity(page.items.len());
        for mut artifact in page.items {
            artifact.migrate_legacy_fields();
            let mut document = serde_json::to_value(&artifact)?;
            strip_source_code(&mut document);
            if let Some(fields) = fields {
                document = project_fields(&document, fields);
            }
            items.push(document);
        }
        Ok(QueryPage {
            items,
            total: page.total,
            offset: page.offset,
            limit: page.limit,
            has_more: page.has_more,
        })
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.ctx.ensure_writable()?;
        self.ctx.inner.artifacts.delete(id).await?;
        self.ctx.inner.links.delete_links_for_entity(id).await?;
        self.ctx.refresh_statistics().await?;
        Ok(())
    }

    pub async fn get_history(&self, id: &str) -> Result<EntityHistory> {
        self.ctx.entity_history(EntityKind::Artifact, id).await
    }

    pub async fn diff(&self, id: &str, v1: u64, v2: u64) -> Result<Vec<FieldChange>> {
        self.ctx.entity_diff(EntityKind::Artifact, id, v1, v2).await
    }

    pub fn list_fields(&self) -> &'static [&'static str] {
        EntityKind::Artifact.field_names()
    }

    async fn ensure_slug_free(&self, slug: &str, exclude_id: Option<&str>) -> Result<()> {
        let all = self.ctx.inner.artifacts.find_all().await?;
        let clash = all
            .iter()
            .any(|artifact| artifact.slug == slug && Some(artifact.id()) != exclude_id);
        if clash {
            return Err(StoreError::Integrity(format!(
                "artifact slug '{}' is already taken in this plan",
                slug
            )));
        }
        Ok(())
    }
}

fn strip_source_code(document: &mut Value) {
    if let Some(content) = document.get_mut("content").and_then(Value::as_object_mut) {
        content.remove("sourceCode");
    }
}

fn project_fields(document: &Value, fields: &[String]) -> Value {
    let mut projected = serde_json::Map::new();
    // The id always travels with a projection.
    if let Some(id) = document.get("id") {
        projected.insert("id".to_string(), id.clone());
    }
    for field in fields {
        if field == "content.sourceCode" {
            continue;
        }
        if let Some(value) = lookup(document, field) {
            insert_path(&mut projected, field, value.clone());
        }
    }
    Value::Object(projected)
}

fn insert_path(target: &mut serde_json::Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last().expect("split yields at least one segment");
    let mut current = target;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(serde_json::Map::new());
        }
        current = slot.as_object_mut().expect("slot was just made an object");
    }
    current.insert(last.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn source_code_is_stripped() {
        let mut doc = json!({"content": {"language": "rust", "sourceCode": "fn main() {}"}});
        strip_source_code(&mut doc);
        assert_eq!(doc, json!({"content": {"language": "rust"}}));
    }

    #[test]
    fn projection_keeps_id_and_requested_paths() {
        let doc = json!({
            "id": "a1",
            "title": "Patch",
            "slug": "patch",
            "content": {"language": "rust", "filename": "main.rs"}
        });
        let projected = project_fields(&doc, &["title".into(), "content.language".into()]);
        assert_eq!(
            projected,
            json!({"id": "a1", "title": "Patch", "content": {"language": "rust"}})
        );
    }

    #[test]
    fn projection_cannot_reach_source_code() {
        let doc = json!({"id": "a1", "content": {"sourceCode": "secret"}});
        let projected = project_fields(&doc, &["content.sourceCode".into()]);
        assert_eq!(projected, json!({"id": "a1"}));
    }
}
