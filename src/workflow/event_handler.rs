use super::{CompletionHandler, WorkflowContext, WorkflowDefinition, WorkflowInfo};
use crate::{
    errors::{ActivityError, FlowError, WorkflowTaskError},
    protocol::{Decision, EventAttributes, EventType, HistoryEvent, WorkflowType},
};
use std::sync::Arc;

type Result<T, E = WorkflowTaskError> = std::result::Result<T, E>;

/// Caller-supplied factory producing a [`WorkflowDefinition`] for a workflow
/// type
pub type WorkflowDefinitionFactory =
    Arc<dyn Fn(&WorkflowType) -> Result<WorkflowDefinition, FlowError> + Send + Sync>;

/// Consumes the history events of one workflow execution, one at a time, in
/// history order. Owns the execution's [`WorkflowContext`] and, from the
/// `WorkflowExecutionStarted` event on, its [`WorkflowDefinition`].
///
/// `process_event` returns `Some(batch)` for events that drain the pending
/// decisions and `None` for events that produce no response of their own.
pub struct WorkflowEventHandler {
    context: Arc<WorkflowContext>,
    factory: WorkflowDefinitionFactory,
    definition: Option<WorkflowDefinition>,
}

impl WorkflowEventHandler {
    pub fn new(
        workflow_info: WorkflowInfo,
        factory: WorkflowDefinitionFactory,
        completion: CompletionHandler,
    ) -> Self {
        Self {
            context: Arc::new(WorkflowContext::new(workflow_info, completion)),
            factory,
            definition: None,
        }
    }

    pub fn process_event(&mut self, event: &HistoryEvent) -> Result<Option<Vec<Decision>>> {
        debug!(
            event_id = event.event_id,
            event_type = ?event.event_type,
            "processing history event"
        );
        match event.event_type {
            EventType::WorkflowExecutionStarted => {
                let Some(EventAttributes::WorkflowExecutionStarted(attributes)) = &event.attributes
                else {
                    return Err(bad_attributes(event));
                };
                self.handle_workflow_execution_started(attributes.input.clone())
            }
            // The server already acknowledged a prior terminal decision.
            EventType::WorkflowExecutionCompleted | EventType::WorkflowExecutionFailed => Ok(None),
            EventType::WorkflowExecutionTimedOut => Ok(None),
            EventType::DecisionTaskScheduled
            | EventType::DecisionTaskStarted
            | EventType::DecisionTaskCompleted
            | EventType::DecisionTaskTimedOut => Ok(None),
            EventType::ActivityTaskScheduled => {
                let Some(EventAttributes::ActivityTaskScheduled(attributes)) = &event.attributes
                else {
                    return Err(bad_attributes(event));
                };
                self.context
                    .register_scheduled_event(event.event_id, attributes.activity_id.clone());
                Ok(None)
            }
            EventType::ActivityTaskStarted => Ok(None),
            EventType::ActivityTaskCompleted => {
                let Some(EventAttributes::ActivityTaskCompleted(attributes)) = &event.attributes
                else {
                    return Err(bad_attributes(event));
                };
                self.handle_activity_resolution(
                    attributes.scheduled_event_id,
                    Ok(attributes.result.clone()),
                )
            }
            EventType::ActivityTaskFailed => {
                let Some(EventAttributes::ActivityTaskFailed(attributes)) = &event.attributes
                else {
                    return Err(bad_attributes(event));
                };
                self.handle_activity_resolution(
                    attributes.scheduled_event_id,
                    Err(ActivityError::Failed {
                        reason: attributes.reason.clone(),
                        details: attributes.details.clone(),
                    }),
                )
            }
            EventType::ActivityTaskTimedOut => {
                let Some(EventAttributes::ActivityTaskTimedOut(attributes)) = &event.attributes
                else {
                    return Err(bad_attributes(event));
                };
                self.handle_activity_resolution(
                    attributes.scheduled_event_id,
                    Err(ActivityError::TimedOut {
                        timeout_type: attributes.timeout_type,
                    }),
                )
            }
            // Timer decisions exist in the wire model but the engine does not
            // drive them yet.
            EventType::TimerStarted | EventType::TimerFired => Ok(None),
            other => Err(WorkflowTaskError::MissingEventHandler { event_type: other }),
        }
    }

    fn handle_workflow_execution_started(
        &mut self,
        input: Vec<u8>,
    ) -> Result<Option<Vec<Decision>>> {
        let workflow_type = self.context.workflow_info().workflow_type.clone();
        let mut definition =
            (self.factory)(&workflow_type).map_err(|source| WorkflowTaskError::DefinitionFactory {
                workflow_type: workflow_type.name.clone(),
                source,
            })?;
        definition.execute(self.context.clone(), input);
        self.definition = Some(definition);
        self.drain()
    }

    fn handle_activity_resolution(
        &mut self,
        scheduled_event_id: i64,
        outcome: std::result::Result<Vec<u8>, ActivityError>,
    ) -> Result<Option<Vec<Decision>>> {
        let callback = self.context.take_activity_handler(scheduled_event_id)?;
        // The callback re-drives the dispatcher itself; by the time it
        // returns, every coroutine it woke has advanced to its next block.
        callback(outcome);
        self.drain()
    }

    fn drain(&self) -> Result<Option<Vec<Decision>>> {
        if let Some(err) = self.context.take_state_error() {
            return Err(err);
        }
        Ok(Some(self.context.swap_pending_decisions(Vec::new())))
    }

    /// Suspension points of the execution's coroutines, for diagnostics
    pub fn stack_trace(&self) -> String {
        self.definition
            .as_ref()
            .map(WorkflowDefinition::stack_trace)
            .unwrap_or_default()
    }

    pub fn close(&mut self) {
        if let Some(definition) = self.definition.take() {
            definition.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &Arc<WorkflowContext> {
        &self.context
    }
}

fn bad_attributes(event: &HistoryEvent) -> WorkflowTaskError {
    WorkflowTaskError::BadEventAttributes {
        event_type: event.event_type,
        event_id: event.event_id,
    }
}
