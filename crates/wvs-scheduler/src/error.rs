/// Errors returned by the scheduler's producer side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The scheduler loop has stopped; the action was not queued.
    #[error("scheduler is closed")]
    Closed,

    /// The scheduler task itself died instead of returning its state.
    #[error("scheduler task failed: {0}")]
    TaskFailed(String),
}
