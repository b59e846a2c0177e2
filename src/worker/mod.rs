//! Task-polling workers, one per task list, plus the client used to start
//! executions. Workers run their poll routines as tokio tasks; decision
//! tasks are handled one execution per routine at a time, activity tasks are
//! free to do real work.

mod task_handlers;

pub use task_handlers::{
    ActivityTaskHandler, ActivityTaskResponse, RegistryActivityTaskHandler,
    ReplayWorkflowTaskHandler, WorkflowTaskHandler,
};
#[cfg(test)]
pub(crate) use task_handlers::terminal_decision_completion;

use crate::{
    errors::FlowError,
    pollers::{is_service_transient_error, with_retry, RetryConfig, ServiceError, WorkflowService},
    protocol::{
        ActivityType, PollForActivityTaskRequest, PollForDecisionTaskRequest,
        RecordActivityTaskHeartbeatRequest, RecordActivityTaskHeartbeatResponse,
        StartWorkflowExecutionRequest, TaskList, WorkflowExecution, WorkflowType,
    },
    task_token::TaskToken,
    workflow::WorkflowDefinitionFactory,
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle};

/// Pause after a poll cycle that failed outright, so a broken service does
/// not get hammered
const POLL_FAILURE_DELAY: Duration = Duration::from_secs(1);

/// Worker configure/execution options
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Task list to poll
    pub task_list: String,
    /// How many concurrent poll routines to run for the task list
    pub concurrent_poll_routine_count: usize,
    /// Identity reported to the service for debuggability; generated from
    /// the task list when empty
    pub identity: String,
    pub retry_config: RetryConfig,
}

impl WorkerConfig {
    pub fn new(task_list: impl Into<String>) -> Self {
        Self {
            task_list: task_list.into(),
            concurrent_poll_routine_count: 1,
            identity: String::new(),
            retry_config: RetryConfig::default(),
        }
    }
}

/// Default worker identity for a task list
pub fn worker_identity(task_list: &str) -> String {
    format!("{}@{}", std::process::id(), task_list)
}

/// An activity implementation. Unlike workflow code, activities are free to
/// do IO, use the clock, and spawn tasks; the service enforces their
/// timeouts.
#[async_trait]
pub trait Activity: Send + Sync {
    async fn execute(
        &self,
        ctx: ActivityExecutionContext,
        input: Vec<u8>,
    ) -> Result<Vec<u8>, FlowError>;
}

/// Caller-supplied factory resolving an activity type to its implementation
pub type ActivityImplementationFactory =
    Arc<dyn Fn(&ActivityType) -> Result<Arc<dyn Activity>, FlowError> + Send + Sync>;

/// Context object passed to an activity implementation
pub struct ActivityExecutionContext {
    task_token: TaskToken,
    identity: String,
    service: Arc<dyn WorkflowService>,
}

impl ActivityExecutionContext {
    pub(crate) fn new(
        task_token: TaskToken,
        identity: String,
        service: Arc<dyn WorkflowService>,
    ) -> Self {
        Self {
            task_token,
            identity,
            service,
        }
    }

    pub fn task_token(&self) -> &TaskToken {
        &self.task_token
    }

    /// Record liveness for a long-running activity. Required before the
    /// heartbeat timeout elapses when one is configured.
    pub async fn record_heartbeat(
        &self,
        details: Vec<u8>,
    ) -> Result<RecordActivityTaskHeartbeatResponse, ServiceError> {
        self.service
            .record_activity_task_heartbeat(RecordActivityTaskHeartbeatRequest {
                task_token: self.task_token.clone(),
                details,
                identity: self.identity.clone(),
            })
            .await
    }
}

/// Collection of activity implementations keyed by type name
#[derive(Default)]
pub struct ActivityRegistry {
    implementations: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, implementation: impl Activity + 'static) {
        self.implementations
            .insert(name.into(), Arc::new(implementation));
    }

    pub fn into_factory(self) -> ActivityImplementationFactory {
        let implementations = self.implementations;
        Arc::new(move |activity_type| {
            implementations.get(&activity_type.name).cloned().ok_or_else(|| {
                FlowError::from_reason(format!(
                    "unregistered activity type: {}",
                    activity_type.name
                ))
            })
        })
    }
}

/// Test seam: replace the default task handlers at worker construction
#[derive(Default)]
pub struct WorkerOverrides {
    pub workflow_task_handler: Option<Arc<dyn WorkflowTaskHandler>>,
    pub activity_task_handler: Option<Arc<dyn ActivityTaskHandler>>,
}

/// One steady-state poll cycle of a worker
#[async_trait]
trait PollRoutine: Send + Sync + 'static {
    async fn poll_and_process(&self) -> Result<(), ServiceError>;
}

/// Shared poll-loop machinery of both worker kinds
struct BaseWorker {
    routine_count: usize,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl BaseWorker {
    fn new(routine_count: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            routine_count: routine_count.max(1),
            shutdown_tx,
            shutdown_rx,
            join_handles: Vec::new(),
        }
    }

    fn start(&mut self, routine: Arc<dyn PollRoutine>) {
        for slot in 0..self.routine_count {
            let routine = routine.clone();
            let shutdown_rx = self.shutdown_rx.clone();
            self.join_handles.push(tokio::spawn(async move {
                debug!(slot, "poll routine started");
                while !*shutdown_rx.borrow() {
                    if let Err(error) = routine.poll_and_process().await {
                        warn!(%error, "poll cycle failed");
                        tokio::time::sleep(POLL_FAILURE_DELAY).await;
                    }
                }
                debug!(slot, "poll routine stopped");
            }));
        }
    }

    /// Signal all routines and wait for them to finish their current cycle
    async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles.drain(..) {
            if let Err(error) = handle.await {
                warn!(%error, "poll routine ended abnormally");
            }
        }
    }
}

/// Hosts workflow definitions for one task list: polls for decision tasks,
/// replays them, responds with decisions.
pub struct WorkflowWorker {
    routine: Arc<WorkflowPollRoutine>,
    worker: BaseWorker,
    identity: String,
}

impl WorkflowWorker {
    pub fn new(
        config: WorkerConfig,
        factory: WorkflowDefinitionFactory,
        service: Arc<dyn WorkflowService>,
    ) -> Self {
        Self::new_with_overrides(config, factory, service, WorkerOverrides::default())
    }

    pub fn new_with_overrides(
        config: WorkerConfig,
        factory: WorkflowDefinitionFactory,
        service: Arc<dyn WorkflowService>,
        overrides: WorkerOverrides,
    ) -> Self {
        let identity = if config.identity.is_empty() {
            worker_identity(&config.task_list)
        } else {
            config.identity.clone()
        };
        let handler = overrides.workflow_task_handler.unwrap_or_else(|| {
            Arc::new(ReplayWorkflowTaskHandler::new(
                config.task_list.clone(),
                identity.clone(),
                factory,
            ))
        });
        let routine = Arc::new(WorkflowPollRoutine {
            service,
            task_list: config.task_list.clone(),
            identity: identity.clone(),
            retry_config: config.retry_config.clone(),
            handler,
        });
        Self {
            routine,
            worker: BaseWorker::new(config.concurrent_poll_routine_count),
            identity,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn start(&mut self) {
        self.worker.start(self.routine.clone());
    }

    pub async fn shutdown(&mut self) {
        self.worker.shutdown().await;
    }
}

struct WorkflowPollRoutine {
    service: Arc<dyn WorkflowService>,
    task_list: String,
    identity: String,
    retry_config: RetryConfig,
    handler: Arc<dyn WorkflowTaskHandler>,
}

#[async_trait]
impl PollRoutine for WorkflowPollRoutine {
    async fn poll_and_process(&self) -> Result<(), ServiceError> {
        let request = PollForDecisionTaskRequest {
            task_list: TaskList {
                name: self.task_list.clone(),
            },
            identity: self.identity.clone(),
        };
        let task = with_retry(&self.retry_config, is_service_transient_error, || {
            self.service.poll_for_decision_task(request.clone())
        })
        .await?;
        if task.task_token.is_empty() {
            return Ok(());
        }
        match self.handler.process_workflow_task(task) {
            Ok(response) => {
                with_retry(&self.retry_config, is_service_transient_error, || {
                    self.service.respond_decision_task_completed(response.clone())
                })
                .await
            }
            Err(error) => {
                // The service redelivers the task after the decision-task
                // timeout.
                warn!(%error, "failed to process decision task; skipping");
                Ok(())
            }
        }
    }
}

/// Hosts activity implementations for one task list: polls for activity
/// tasks, runs them, reports the outcome.
pub struct ActivityWorker {
    routine: Arc<ActivityPollRoutine>,
    worker: BaseWorker,
    identity: String,
}

impl ActivityWorker {
    pub fn new(
        config: WorkerConfig,
        factory: ActivityImplementationFactory,
        service: Arc<dyn WorkflowService>,
    ) -> Self {
        Self::new_with_overrides(config, factory, service, WorkerOverrides::default())
    }

    pub fn new_with_overrides(
        config: WorkerConfig,
        factory: ActivityImplementationFactory,
        service: Arc<dyn WorkflowService>,
        overrides: WorkerOverrides,
    ) -> Self {
        let identity = if config.identity.is_empty() {
            worker_identity(&config.task_list)
        } else {
            config.identity.clone()
        };
        let handler = overrides.activity_task_handler.unwrap_or_else(|| {
            Arc::new(RegistryActivityTaskHandler::new(
                identity.clone(),
                factory,
                service.clone(),
            ))
        });
        let routine = Arc::new(ActivityPollRoutine {
            service,
            task_list: config.task_list.clone(),
            identity: identity.clone(),
            retry_config: config.retry_config.clone(),
            handler,
        });
        Self {
            routine,
            worker: BaseWorker::new(config.concurrent_poll_routine_count),
            identity,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn start(&mut self) {
        self.worker.start(self.routine.clone());
    }

    pub async fn shutdown(&mut self) {
        self.worker.shutdown().await;
    }
}

struct ActivityPollRoutine {
    service: Arc<dyn WorkflowService>,
    task_list: String,
    identity: String,
    retry_config: RetryConfig,
    handler: Arc<dyn ActivityTaskHandler>,
}

#[async_trait]
impl PollRoutine for ActivityPollRoutine {
    async fn poll_and_process(&self) -> Result<(), ServiceError> {
        let request = PollForActivityTaskRequest {
            task_list: TaskList {
                name: self.task_list.clone(),
            },
            identity: self.identity.clone(),
        };
        let task = with_retry(&self.retry_config, is_service_transient_error, || {
            self.service.poll_for_activity_task(request.clone())
        })
        .await?;
        if task.task_token.is_empty() {
            return Ok(());
        }
        match self.handler.execute(task).await {
            ActivityTaskResponse::Completed(response) => {
                with_retry(&self.retry_config, is_service_transient_error, || {
                    self.service
                        .respond_activity_task_completed(response.clone())
                })
                .await
            }
            ActivityTaskResponse::Failed(response) => {
                with_retry(&self.retry_config, is_service_transient_error, || {
                    self.service.respond_activity_task_failed(response.clone())
                })
                .await
            }
        }
    }
}

/// Configuration for starting a workflow execution
#[derive(Clone, Debug, Default)]
pub struct StartWorkflowOptions {
    pub workflow_id: String,
    pub workflow_type: WorkflowType,
    pub task_list: String,
    pub input: Vec<u8>,
    pub execution_start_to_close_timeout_seconds: i32,
    pub decision_task_start_to_close_timeout_seconds: i32,
    pub identity: String,
}

/// Client-facing entry point for starting workflow executions
pub struct WorkflowClient {
    options: StartWorkflowOptions,
    service: Arc<dyn WorkflowService>,
    retry_config: RetryConfig,
    pub identity: String,
}

impl WorkflowClient {
    pub fn new(options: StartWorkflowOptions, service: Arc<dyn WorkflowService>) -> Self {
        let identity = if options.identity.is_empty() {
            worker_identity(&options.task_list)
        } else {
            options.identity.clone()
        };
        Self {
            options,
            service,
            retry_config: RetryConfig::default(),
            identity,
        }
    }

    /// Start a workflow execution, retrying transient service errors
    pub async fn start_workflow_execution(&self) -> Result<WorkflowExecution, ServiceError> {
        let request = StartWorkflowExecutionRequest {
            workflow_id: self.options.workflow_id.clone(),
            workflow_type: self.options.workflow_type.clone(),
            task_list: TaskList {
                name: self.options.task_list.clone(),
            },
            input: self.options.input.clone(),
            execution_start_to_close_timeout_seconds: self
                .options
                .execution_start_to_close_timeout_seconds,
            decision_task_start_to_close_timeout_seconds: self
                .options
                .decision_task_start_to_close_timeout_seconds,
            identity: self.identity.clone(),
        };
        let response = with_retry(&self.retry_config, is_service_transient_error, || {
            self.service.start_workflow_execution(request.clone())
        })
        .await?;
        info!(
            workflow_id = %self.options.workflow_id,
            run_id = %response.run_id,
            "started workflow execution"
        );
        Ok(WorkflowExecution {
            workflow_id: self.options.workflow_id.clone(),
            run_id: response.run_id,
        })
    }
}
