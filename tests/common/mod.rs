//! Shared helpers for integration tests: a throwaway store with one
//! project and one plan.

#![allow(dead_code)]

use planstore::model::{
    ArtifactDraft, DecisionDraft, PhaseDraft, ProjectConfig, RequirementDraft, SolutionDraft,
};
use planstore::service::{PlanContext, PlanDraft};
use planstore::{PlanStore, StoreConfig};
use tempfile::TempDir;

pub const PROJECT: &str = "demo";

pub struct Harness {
    // Held so the directory outlives the store.
    pub dir: TempDir,
    pub store: PlanStore,
    pub plan_id: String,
}

impl Harness {
    pub async fn context(&self) -> PlanContext {
        self.store.context(PROJECT, &self.plan_id).await.unwrap()
    }
}

pub async fn harness() -> Harness {
    harness_with(|_| {}).await
}

pub async fn harness_with(tweak: impl FnOnce(&mut PlanDraft)) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = PlanStore::open(StoreConfig::new(dir.path())).await.unwrap();
    store
        .projects()
        .init(ProjectConfig::new(PROJECT))
        .await
        .unwrap();
    let mut draft = PlanDraft {
        name: Some("integration".to_string()),
        ..PlanDraft::default()
    };
    tweak(&mut draft);
    let manifest = store.plans(PROJECT).create(draft).await.unwrap();
    Harness {
        dir,
        store,
        plan_id: manifest.id,
    }
}

pub fn requirement(title: &str) -> RequirementDraft {
    RequirementDraft::new(title, format!("{} description", title))
}

pub fn solution(title: &str, addressing: Vec<String>) -> SolutionDraft {
    SolutionDraft::new(title, format!("{} description", title), "iterate").addressing(addressing)
}

pub fn decision(title: &str, decision: &str) -> DecisionDraft {
    DecisionDraft::new(title, format!("{}?", title), decision)
}

pub fn phase(title: &str) -> PhaseDraft {
    PhaseDraft::new(title)
}

pub fn artifact(title: &str) -> ArtifactDraft {
    ArtifactDraft::new(title, "code")
}
