//! Error types exposed by public APIs

use crate::protocol::{EventType, TimeoutType};

/// Error returned from workflow and activity implementations, and the shape in
/// which failures travel over the wire: a short machine-readable `reason` tag
/// plus an opaque `details` payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct FlowError {
    /// Short tag identifying the failure
    pub reason: String,
    /// Opaque payload carrying failure context; not interpreted by the core
    pub details: Vec<u8>,
}

impl FlowError {
    pub fn new(reason: impl Into<String>, details: impl Into<Vec<u8>>) -> Self {
        Self {
            reason: reason.into(),
            details: details.into(),
        }
    }

    /// An error with a reason tag and no details payload
    pub fn from_reason(reason: impl Into<String>) -> Self {
        Self::new(reason, Vec::new())
    }
}

/// Terminal outcome of an activity as observed by the waiting workflow code.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActivityError {
    /// The activity implementation reported failure
    #[error("activity task failed: {reason}")]
    Failed { reason: String, details: Vec<u8> },
    /// The service timed the activity out; the variant says which timeout hit
    #[error("activity task timed out: {timeout_type}")]
    TimedOut { timeout_type: TimeoutType },
}

impl From<ActivityError> for FlowError {
    fn from(e: ActivityError) -> Self {
        match e {
            ActivityError::Failed { reason, details } => FlowError::new(reason, details),
            ActivityError::TimedOut { timeout_type } => {
                FlowError::from_reason(format!("activity timeout: {timeout_type}"))
            }
        }
    }
}

/// Fatal conditions hit while processing a decision task. The worker logs
/// these and skips the task; the service redelivers it after the decision-task
/// timeout.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowTaskError {
    /// A history event arrived without attributes, or with attributes that do
    /// not match its event type
    #[error("history event {event_id} ({event_type:?}) has missing or mismatched attributes")]
    BadEventAttributes {
        event_type: EventType,
        event_id: i64,
    },
    /// The event type is not part of the handling table
    #[error("missing event handler for event type {event_type:?}")]
    MissingEventHandler { event_type: EventType },
    /// A terminal activity event referenced a scheduled event id that was
    /// never recorded
    #[error("no activity id recorded for scheduled event id {scheduled_event_id}")]
    UnknownScheduledEvent { scheduled_event_id: i64 },
    /// The scheduled event id resolved to an activity id with no registered
    /// result callback
    #[error("no result callback registered for activity id {activity_id}")]
    UnknownActivityId { activity_id: String },
    /// Workflow code scheduled two activities under the same id, which would
    /// make terminal events ambiguous
    #[error("activity id {activity_id} scheduled more than once")]
    DuplicateActivityId { activity_id: String },
    /// The caller-supplied workflow definition factory rejected the workflow
    /// type
    #[error("workflow definition factory failed for type {workflow_type}: {source}")]
    DefinitionFactory {
        workflow_type: String,
        source: FlowError,
    },
    /// The decision task carried no history events at all
    #[error("decision task contained no history events")]
    EmptyHistory,
}
