//! Job lifecycle events published on the orchestrator's broadcast channel.
//!
//! The front end (CLI or anything else) observes status either by polling
//! [`crate::Orchestrator::status`] or by subscribing to these events; the
//! core has no awareness of how status is displayed.

use autoblogger_shared::{JobId, JobState, PipelineStage};

/// One observable change in a job's lifecycle.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The job transitioned to a new state (persisted before emission).
    StateChanged { job_id: JobId, state: JobState },

    /// A stage failed with a retryable error and will run again.
    StageRetrying {
        job_id: JobId,
        stage: PipelineStage,
        /// Retry count recorded so far (1 = first retry upcoming).
        attempt: u32,
        error: String,
    },
}

impl JobEvent {
    /// The job this event belongs to.
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::StateChanged { job_id, .. } | Self::StageRetrying { job_id, .. } => job_id,
        }
    }
}
