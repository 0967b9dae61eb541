//! Domain services: cross-entity invariants and action semantics composed
//! on top of the repositories.

mod artifacts;
mod batch;
mod context;
mod decisions;
mod linking;
mod phases;
mod plans;
mod projects;
mod queries;
mod requirements;
mod slug;
mod solutions;

pub use artifacts::ArtifactService;
pub use batch::{BatchCreated, BatchExecutor, BatchOperation, BatchOutcome};
pub use context::PlanContext;
pub use decisions::{DecisionService, SupersedeOutcome, SupersedeSpec};
pub use linking::LinkingService;
pub use phases::{
    CompleteAndAdvance, ParentChange, PhaseService, PhaseTreeNode, StatusUpdate,
};
pub use plans::{PlanDraft, PlanService, PlanSummary};
pub use projects::ProjectService;
pub use queries::{
    ExportFormat, ExportResult, HealthReport, QueryService, SearchHit, Severity, TraceReport,
    ValidationFinding, ValidationLevel, ValidationReport,
};
pub use requirements::RequirementService;
pub use slug::slugify;
pub use solutions::{
    AspectEntry, AspectRow, ComparisonMatrix, SelectionOutcome, SolutionService,
};

impl PlanContext {
    pub fn requirements(&self) -> RequirementService {
        RequirementService::new(self.clone())
    }

    pub fn solutions(&self) -> SolutionService {
        SolutionService::new(self.clone())
    }

    pub fn decisions(&self) -> DecisionService {
        DecisionService::new(self.clone())
    }

    pub fn phases(&self) -> PhaseService {
        PhaseService::new(self.clone())
    }

    pub fn artifacts(&self) -> ArtifactService {
        ArtifactService::new(self.clone())
    }

    pub fn linking(&self) -> LinkingService {
        LinkingService::new(self.clone())
    }

    pub fn batch(&self) -> BatchExecutor {
        BatchExecutor::new(self.clone())
    }

    pub fn queries(&self) -> QueryService {
        QueryService::new(self.clone())
    }
}
