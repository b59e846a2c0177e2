//! The decision engine: per-execution state, history event handling, and the
//! adapter that hosts user workflow code on the coroutine runtime.

mod context;
mod definition;
mod event_handler;

pub use context::{CompletionHandler, ResultHandler, WorkflowContext};
pub use definition::{WfContext, Workflow, WorkflowDefinition, WorkflowFn};
pub use event_handler::{WorkflowDefinitionFactory, WorkflowEventHandler};

use crate::protocol::{WorkflowExecution, WorkflowType};

/// Immutable descriptor of one workflow execution, available to workflow code
/// for the duration of a decision task.
#[derive(Clone, Debug, Default)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub task_list: String,
}

/// User-supplied parameters for scheduling an activity
#[derive(Clone, Debug, Default)]
pub struct ActivityRequest {
    /// Explicit activity id; generated from the execution's counter when
    /// absent
    pub activity_id: Option<String>,
    pub activity_type: crate::protocol::ActivityType,
    pub task_list: String,
    pub input: Vec<u8>,
    pub schedule_to_close_timeout_seconds: i32,
    pub schedule_to_start_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
}
