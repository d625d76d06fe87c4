// src/context.rs
use tracing::Span;

/// Context handed to a [`TaskHandler`](crate::TaskHandler) with each payload
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub taskname: String,
    /// Tick bucket the payload was popped from
    pub tick: i64,
    pub sweeper_id: String,
    pub span: Span,
}

impl TaskContext {
    pub fn new(taskname: impl Into<String>, tick: i64, sweeper_id: impl Into<String>) -> Self {
        let taskname = taskname.into();
        let sweeper_id = sweeper_id.into();
        let span = tracing::info_span!(
            "task_execution",
            taskname = %taskname,
            tick = tick,
            sweeper_id = %sweeper_id,
        );

        Self {
            taskname,
            tick,
            sweeper_id,
            span,
        }
    }
}
