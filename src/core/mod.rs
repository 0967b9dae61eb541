mod config;
mod error;

pub use config::{LockConfig, StoreConfig, MAX_HISTORY_DEPTH};
pub use error::{BatchFailure, Result, StoreError, ValidationIssue};
