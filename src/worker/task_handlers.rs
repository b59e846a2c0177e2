use super::{ActivityExecutionContext, ActivityImplementationFactory};
use crate::{
    errors::WorkflowTaskError,
    pollers::WorkflowService,
    protocol::{
        CompleteWorkflowExecutionDecisionAttributes, DecisionAttributes, DecisionType,
        FailWorkflowExecutionDecisionAttributes, PollForActivityTaskResponse,
        PollForDecisionTaskResponse, RespondActivityTaskCompletedRequest,
        RespondActivityTaskFailedRequest, RespondDecisionTaskCompletedRequest,
    },
    workflow::{CompletionHandler, WorkflowDefinitionFactory, WorkflowEventHandler, WorkflowInfo},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Turns one delivered decision task into the response to send back
pub trait WorkflowTaskHandler: Send + Sync {
    fn process_workflow_task(
        &self,
        task: PollForDecisionTaskResponse,
    ) -> Result<RespondDecisionTaskCompletedRequest, WorkflowTaskError>;
}

/// Default decision task handler: replays the delivered history through a
/// fresh event handler, event by event, and responds with the batch drained
/// by the latest decision-producing event. Earlier drains regenerate the
/// decisions of already-acknowledged tasks and are discarded.
pub struct ReplayWorkflowTaskHandler {
    task_list: String,
    identity: String,
    factory: WorkflowDefinitionFactory,
}

impl ReplayWorkflowTaskHandler {
    pub fn new(task_list: String, identity: String, factory: WorkflowDefinitionFactory) -> Self {
        Self {
            task_list,
            identity,
            factory,
        }
    }
}

/// Completion handler turning the workflow's terminal result into its
/// terminal decision, appended to the same pending batch the final drain
/// picks up.
pub(crate) fn terminal_decision_completion() -> CompletionHandler {
    Box::new(|context, result| {
        let decision = match result {
            Ok(result) => {
                debug!("workflow execution completed");
                let mut decision = context.new_decision(DecisionType::CompleteWorkflowExecution);
                decision.attributes = Some(DecisionAttributes::CompleteWorkflowExecution(
                    CompleteWorkflowExecutionDecisionAttributes { result },
                ));
                decision
            }
            Err(err) => {
                warn!(reason = %err.reason, "workflow execution failed");
                let mut decision = context.new_decision(DecisionType::FailWorkflowExecution);
                decision.attributes = Some(DecisionAttributes::FailWorkflowExecution(
                    FailWorkflowExecutionDecisionAttributes {
                        reason: err.reason,
                        details: err.details,
                    },
                ));
                decision
            }
        };
        context.push_decision(decision);
    })
}

impl WorkflowTaskHandler for ReplayWorkflowTaskHandler {
    fn process_workflow_task(
        &self,
        task: PollForDecisionTaskResponse,
    ) -> Result<RespondDecisionTaskCompletedRequest, WorkflowTaskError> {
        if task.history.events.is_empty() {
            return Err(WorkflowTaskError::EmptyHistory);
        }
        let workflow_info = WorkflowInfo {
            workflow_execution: task.workflow_execution.unwrap_or_default(),
            workflow_type: task.workflow_type.unwrap_or_default(),
            task_list: self.task_list.clone(),
        };
        let mut handler = WorkflowEventHandler::new(
            workflow_info,
            self.factory.clone(),
            terminal_decision_completion(),
        );
        let mut decisions = Vec::new();
        for event in &task.history.events {
            if let Some(batch) = handler.process_event(event)? {
                decisions = batch;
            }
        }
        handler.close();
        Ok(RespondDecisionTaskCompletedRequest {
            task_token: task.task_token,
            decisions,
            identity: self.identity.clone(),
        })
    }
}

/// Outcome of one activity task, ready to send back to the service
pub enum ActivityTaskResponse {
    Completed(RespondActivityTaskCompletedRequest),
    Failed(RespondActivityTaskFailedRequest),
}

/// Turns one delivered activity task into its response
#[async_trait]
pub trait ActivityTaskHandler: Send + Sync {
    async fn execute(&self, task: PollForActivityTaskResponse) -> ActivityTaskResponse;
}

/// Default activity task handler: resolves the implementation through the
/// caller-supplied factory and runs it. An unresolvable activity type fails
/// the task rather than the worker.
pub struct RegistryActivityTaskHandler {
    identity: String,
    factory: ActivityImplementationFactory,
    service: Arc<dyn WorkflowService>,
}

impl RegistryActivityTaskHandler {
    pub fn new(
        identity: String,
        factory: ActivityImplementationFactory,
        service: Arc<dyn WorkflowService>,
    ) -> Self {
        Self {
            identity,
            factory,
            service,
        }
    }
}

#[async_trait]
impl ActivityTaskHandler for RegistryActivityTaskHandler {
    async fn execute(&self, task: PollForActivityTaskResponse) -> ActivityTaskResponse {
        let activity_type = task.activity_type.clone().unwrap_or_default();
        let implementation = match (self.factory)(&activity_type) {
            Ok(implementation) => implementation,
            Err(err) => {
                warn!(
                    activity_type = %activity_type.name,
                    reason = %err.reason,
                    "no implementation for activity task"
                );
                return ActivityTaskResponse::Failed(RespondActivityTaskFailedRequest {
                    task_token: task.task_token,
                    reason: err.reason,
                    details: err.details,
                    identity: self.identity.clone(),
                });
            }
        };
        debug!(
            activity_id = %task.activity_id,
            activity_type = %activity_type.name,
            "executing activity task"
        );
        let ctx = ActivityExecutionContext::new(
            task.task_token.clone(),
            self.identity.clone(),
            self.service.clone(),
        );
        match implementation.execute(ctx, task.input).await {
            Ok(result) => ActivityTaskResponse::Completed(RespondActivityTaskCompletedRequest {
                task_token: task.task_token,
                result,
                identity: self.identity.clone(),
            }),
            Err(err) => ActivityTaskResponse::Failed(RespondActivityTaskFailedRequest {
                task_token: task.task_token,
                reason: err.reason,
                details: err.details,
                identity: self.identity.clone(),
            }),
        }
    }
}
