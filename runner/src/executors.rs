pub mod local;

use crate::sync::CoordinatorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Coordinator failed")]
    Coordinator(#[from] CoordinatorError),
}

/// Counters for a finished worker loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub claimed: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Result of running a single parameter set, problems with the run itself
/// (settings file, spawning, waiting) are failures rather than errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}
