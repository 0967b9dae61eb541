//! The storage engine: crash-safe file I/O, the lock manager, per-type
//! indexes, and the repositories built on top of them.

pub mod atomic;
mod history;
mod index;
mod layout;
mod links;
mod lock;
mod plans;
mod repository;

pub use history::{
    diff_documents, ChangeKind, EntityHistory, FieldChange, VersionEntry, VersionHistoryService,
};
pub use index::{IndexManager, IndexRecord};
pub use layout::{PlanPaths, StoreLayout, LEGACY_PROJECT_ID};
pub use links::{LinkDirection, LinkRepository};
pub use lock::{CompromisedCallback, LockGuard, LockManager, ReleaseOutcome};
pub use plans::{ActivePlanMap, PlanRepository};
pub use repository::EntityRepository;
