//! Wire-level data model shared with the workflow service: history events,
//! decisions, and the request/response records of the RPC surface.
//!
//! The transport that moves these records is out of scope for the core; any
//! implementation of [`crate::pollers::WorkflowService`] supplies one.

use crate::task_token::TaskToken;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityType {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub name: String,
}

/// One concrete run of a workflow
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

/// Discriminant of a [`HistoryEvent`]. Carries every type the service emits,
/// including ones this core does not handle yet; the event handler rejects
/// those explicitly rather than skipping them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionTimedOut,
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted,
    DecisionTaskTimedOut,
    ActivityTaskScheduled,
    ActivityTaskStarted,
    ActivityTaskCompleted,
    ActivityTaskFailed,
    ActivityTaskTimedOut,
    TimerStarted,
    TimerFired,
    MarkerRecorded,
    WorkflowExecutionSignaled,
}

/// Which activity timeout fired
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutType {
    StartToClose,
    ScheduleToStart,
    ScheduleToClose,
    Heartbeat,
}

impl fmt::Display for TimeoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeoutType::StartToClose => "START_TO_CLOSE",
            TimeoutType::ScheduleToStart => "SCHEDULE_TO_START",
            TimeoutType::ScheduleToClose => "SCHEDULE_TO_CLOSE",
            TimeoutType::Heartbeat => "HEARTBEAT",
        };
        f.write_str(s)
    }
}

/// One entry of a workflow execution's history. `event_id` increases
/// monotonically within a history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_type: EventType,
    pub attributes: Option<EventAttributes>,
}

impl HistoryEvent {
    pub fn new(event_id: i64, event_type: EventType, attributes: Option<EventAttributes>) -> Self {
        Self {
            event_id,
            event_type,
            attributes,
        }
    }
}

/// Type-specific payload of a history event. Only the event types the core
/// consumes data from have an attribute record; pure-marker events carry
/// `None` attributes on the event itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventAttributes {
    WorkflowExecutionStarted(WorkflowExecutionStartedEventAttributes),
    ActivityTaskScheduled(ActivityTaskScheduledEventAttributes),
    ActivityTaskCompleted(ActivityTaskCompletedEventAttributes),
    ActivityTaskFailed(ActivityTaskFailedEventAttributes),
    ActivityTaskTimedOut(ActivityTaskTimedOutEventAttributes),
    TimerStarted(TimerStartedEventAttributes),
    TimerFired(TimerFiredEventAttributes),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionStartedEventAttributes {
    pub task_list: TaskList,
    pub input: Vec<u8>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub decision_task_start_to_close_timeout_seconds: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskScheduledEventAttributes {
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub task_list: TaskList,
    pub input: Vec<u8>,
    pub schedule_to_close_timeout_seconds: i32,
    pub schedule_to_start_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskCompletedEventAttributes {
    pub scheduled_event_id: i64,
    pub result: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskFailedEventAttributes {
    pub scheduled_event_id: i64,
    pub reason: String,
    pub details: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityTaskTimedOutEventAttributes {
    pub scheduled_event_id: i64,
    pub timeout_type: TimeoutType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStartedEventAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout_seconds: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerFiredEventAttributes {
    pub timer_id: String,
    pub started_event_id: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

/// Discriminant of a [`Decision`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionType {
    ScheduleActivityTask,
    CompleteWorkflowExecution,
    FailWorkflowExecution,
    StartTimer,
    CancelTimer,
}

/// A command emitted by the workflow in response to an event batch. Created
/// with the discriminant set and attributes left for the caller to populate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: DecisionType,
    pub attributes: Option<DecisionAttributes>,
}

impl Decision {
    pub fn new(decision_type: DecisionType) -> Self {
        Self {
            decision_type,
            attributes: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DecisionAttributes {
    ScheduleActivityTask(ScheduleActivityTaskDecisionAttributes),
    CompleteWorkflowExecution(CompleteWorkflowExecutionDecisionAttributes),
    FailWorkflowExecution(FailWorkflowExecutionDecisionAttributes),
    StartTimer(StartTimerDecisionAttributes),
    CancelTimer(CancelTimerDecisionAttributes),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleActivityTaskDecisionAttributes {
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub task_list: TaskList,
    pub input: Vec<u8>,
    pub schedule_to_close_timeout_seconds: i32,
    pub schedule_to_start_timeout_seconds: i32,
    pub start_to_close_timeout_seconds: i32,
    pub heartbeat_timeout_seconds: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteWorkflowExecutionDecisionAttributes {
    pub result: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FailWorkflowExecutionDecisionAttributes {
    pub reason: String,
    pub details: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartTimerDecisionAttributes {
    pub timer_id: String,
    pub start_to_fire_timeout_seconds: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelTimerDecisionAttributes {
    pub timer_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowExecutionRequest {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub task_list: TaskList,
    pub input: Vec<u8>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub decision_task_start_to_close_timeout_seconds: i32,
    pub identity: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowExecutionResponse {
    pub run_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForDecisionTaskRequest {
    pub task_list: TaskList,
    pub identity: String,
}

/// A decision task: the new history for one execution plus the cursor needed
/// to respond. An empty `task_token` means the long poll expired with no work.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForDecisionTaskResponse {
    pub task_token: TaskToken,
    pub workflow_execution: Option<WorkflowExecution>,
    pub workflow_type: Option<WorkflowType>,
    pub history: History,
    pub previous_started_event_id: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespondDecisionTaskCompletedRequest {
    pub task_token: TaskToken,
    pub decisions: Vec<Decision>,
    pub identity: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForActivityTaskRequest {
    pub task_list: TaskList,
    pub identity: String,
}

/// An activity task. As with decision tasks, an empty `task_token` means no
/// work was available.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollForActivityTaskResponse {
    pub task_token: TaskToken,
    pub activity_id: String,
    pub activity_type: Option<ActivityType>,
    pub input: Vec<u8>,
    pub workflow_execution: Option<WorkflowExecution>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskCompletedRequest {
    pub task_token: TaskToken,
    pub result: Vec<u8>,
    pub identity: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RespondActivityTaskFailedRequest {
    pub task_token: TaskToken,
    pub reason: String,
    pub details: Vec<u8>,
    pub identity: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordActivityTaskHeartbeatRequest {
    pub task_token: TaskToken,
    pub details: Vec<u8>,
    pub identity: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordActivityTaskHeartbeatResponse {
    pub cancel_requested: bool,
}
