use super::{ActivityRequest, WorkflowInfo};
use crate::{
    errors::{ActivityError, FlowError, WorkflowTaskError},
    protocol::{
        Decision, DecisionAttributes, DecisionType, ScheduleActivityTaskDecisionAttributes,
        TaskList,
    },
};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Callback delivering an activity's terminal outcome to whoever scheduled it
pub type ResultHandler = Box<dyn FnOnce(Result<Vec<u8>, ActivityError>) + Send>;

/// Callback through which the workflow's terminal result leaves the core. It
/// receives the context so it can append terminal decisions to the pending
/// batch.
pub type CompletionHandler = Box<dyn FnOnce(&WorkflowContext, Result<Vec<u8>, FlowError>) + Send>;

#[derive(Default)]
struct ContextState {
    /// Decisions accumulated since the last swap
    pending_decisions: Vec<Decision>,
    /// Activity id -> result callback for every in-flight activity
    scheduled_activities: HashMap<String, ResultHandler>,
    /// Scheduled event id -> activity id; terminal activity events reference
    /// the scheduled event id, not the activity id
    scheduled_event_to_activity: HashMap<i64, String>,
    /// Source of auto-generated activity ids; advances exactly once per
    /// scheduling call, so it replays deterministically
    activity_counter: u32,
    /// Deferred fatal condition surfaced by the event handler after the pump
    state_error: Option<WorkflowTaskError>,
}

impl ContextState {
    fn next_activity_id(&mut self) -> String {
        let id = self.activity_counter;
        self.activity_counter += 1;
        id.to_string()
    }
}

/// Mutable per-execution state of the decision engine. Mutated only from the
/// execution's own coroutine plane and the event handler driving it; the
/// interior mutex exists to satisfy `Send` bounds and is never contended.
pub struct WorkflowContext {
    workflow_info: WorkflowInfo,
    state: Mutex<ContextState>,
    completion: Mutex<Option<CompletionHandler>>,
}

impl WorkflowContext {
    pub fn new(workflow_info: WorkflowInfo, completion: CompletionHandler) -> Self {
        Self {
            workflow_info,
            state: Mutex::new(ContextState::default()),
            completion: Mutex::new(Some(completion)),
        }
    }

    pub fn workflow_info(&self) -> &WorkflowInfo {
        &self.workflow_info
    }

    /// Next auto-generated activity id: the decimal form of the counter,
    /// which then increments.
    pub fn generate_activity_id(&self) -> String {
        self.state.lock().next_activity_id()
    }

    /// A fresh decision with the discriminant set and attributes left for the
    /// caller to populate. No state mutation.
    pub fn new_decision(&self, decision_type: DecisionType) -> Decision {
        Decision::new(decision_type)
    }

    /// Schedule an activity: append a `ScheduleActivityTask` decision built
    /// from `request` and register `callback` for the terminal event. The
    /// callback fires when the matching terminal history event is processed.
    ///
    /// Scheduling two activities under one id is fatal for the decision task;
    /// the collision is recorded and surfaced by the event handler.
    pub fn execute_activity(&self, request: ActivityRequest, callback: ResultHandler) {
        let mut state = self.state.lock();
        let activity_id = match request.activity_id {
            Some(id) => id,
            None => state.next_activity_id(),
        };
        if state.scheduled_activities.contains_key(&activity_id) {
            warn!(%activity_id, "activity id scheduled more than once");
            state
                .state_error
                .get_or_insert(WorkflowTaskError::DuplicateActivityId {
                    activity_id: activity_id.clone(),
                });
            return;
        }
        let attributes = ScheduleActivityTaskDecisionAttributes {
            activity_id: activity_id.clone(),
            activity_type: request.activity_type,
            task_list: TaskList {
                name: request.task_list,
            },
            input: request.input,
            schedule_to_close_timeout_seconds: request.schedule_to_close_timeout_seconds,
            schedule_to_start_timeout_seconds: request.schedule_to_start_timeout_seconds,
            start_to_close_timeout_seconds: request.start_to_close_timeout_seconds,
            heartbeat_timeout_seconds: request.heartbeat_timeout_seconds,
        };
        debug!(%activity_id, activity_type = %attributes.activity_type.name, "scheduling activity task");
        let mut decision = self.new_decision(DecisionType::ScheduleActivityTask);
        decision.attributes = Some(DecisionAttributes::ScheduleActivityTask(attributes));
        state.pending_decisions.push(decision);
        state.scheduled_activities.insert(activity_id, callback);
    }

    /// Replace the pending decision batch with `new`, returning the old one
    pub fn swap_pending_decisions(&self, new: Vec<Decision>) -> Vec<Decision> {
        std::mem::replace(&mut self.state.lock().pending_decisions, new)
    }

    pub(crate) fn push_decision(&self, decision: Decision) {
        self.state.lock().pending_decisions.push(decision);
    }

    /// Report the workflow's terminal result through the completion handler.
    /// At most once per execution; later calls are ignored.
    pub fn complete(&self, result: Result<Vec<u8>, FlowError>) {
        let handler = self.completion.lock().take();
        match handler {
            Some(handler) => handler(self, result),
            None => debug!("workflow completion reported more than once; ignored"),
        }
    }

    pub(crate) fn register_scheduled_event(&self, event_id: i64, activity_id: String) {
        self.state
            .lock()
            .scheduled_event_to_activity
            .insert(event_id, activity_id);
    }

    /// Resolve a terminal activity event to its result callback, removing the
    /// callback. Both mapping steps must succeed.
    pub(crate) fn take_activity_handler(
        &self,
        scheduled_event_id: i64,
    ) -> Result<ResultHandler, WorkflowTaskError> {
        let mut state = self.state.lock();
        let activity_id = state
            .scheduled_event_to_activity
            .get(&scheduled_event_id)
            .cloned()
            .ok_or(WorkflowTaskError::UnknownScheduledEvent { scheduled_event_id })?;
        state
            .scheduled_activities
            .remove(&activity_id)
            .ok_or(WorkflowTaskError::UnknownActivityId { activity_id })
    }

    pub(crate) fn take_state_error(&self) -> Option<WorkflowTaskError> {
        self.state.lock().state_error.take()
    }
}
