//! The service RPC surface consumed by workers and the retry layer wrapped
//! around it. The core never talks to a transport directly; it calls an
//! implementation of [`WorkflowService`] supplied by the embedding
//! application.

use crate::protocol::{
    PollForActivityTaskRequest, PollForActivityTaskResponse, PollForDecisionTaskRequest,
    PollForDecisionTaskResponse, RecordActivityTaskHeartbeatRequest,
    RecordActivityTaskHeartbeatResponse, RespondActivityTaskCompletedRequest,
    RespondActivityTaskFailedRequest, RespondDecisionTaskCompletedRequest,
    StartWorkflowExecutionRequest, StartWorkflowExecutionResponse,
};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, SystemClock};
use std::{
    future::Future,
    time::{Duration, Instant},
};

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Failure of a service call, already mapped out of whatever transport the
/// [`WorkflowService`] implementation uses
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ServiceError {
    /// Service unreachable or overloaded
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// Request rate exceeded
    #[error("request rate exceeded")]
    RateLimited,
    /// The per-request deadline elapsed before the service replied
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The service failed internally
    #[error("internal service error: {0}")]
    Internal(String),
    /// The request was rejected as malformed; retrying cannot help
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The referenced domain, execution or task does not exist
    #[error("entity not found: {0}")]
    NotFound(String),
}

/// Default transient classification: retry everything except errors the
/// caller has to fix.
pub fn is_service_transient_error(err: &ServiceError) -> bool {
    !matches!(
        err,
        ServiceError::InvalidRequest(_) | ServiceError::NotFound(_)
    )
}

/// Retry configuration for service calls
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Wait before the first retry
    pub initial_interval: Duration,
    /// Jitter multiplier added to or subtracted from each interval
    pub randomization_factor: f64,
    /// Growth rate of the interval, up to `max_interval`
    pub multiplier: f64,
    /// Cap on the per-retry wait
    pub max_interval: Duration,
    /// Total time budget across all retries of one call; `None` is unlimited
    pub max_elapsed_time: Option<Duration>,
    /// Cap on the number of attempts
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            randomization_factor: 0.2,
            multiplier: 1.5,
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(10)),
            max_retries: 10,
        }
    }
}

impl From<RetryConfig> for ExponentialBackoff {
    fn from(c: RetryConfig) -> Self {
        ExponentialBackoff {
            current_interval: c.initial_interval,
            initial_interval: c.initial_interval,
            randomization_factor: c.randomization_factor,
            multiplier: c.multiplier,
            max_interval: c.max_interval,
            max_elapsed_time: c.max_elapsed_time,
            clock: SystemClock::default(),
            start_time: Instant::now(),
        }
    }
}

/// Retry `call` on errors `is_transient` accepts, sleeping per the
/// exponential backoff built from `config`.
pub(crate) async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    is_transient: fn(&ServiceError) -> bool,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff: ExponentialBackoff = config.clone().into();
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_retries || !is_transient(&err) {
                    return Err(err);
                }
                match backoff.next_backoff() {
                    Some(delay) => {
                        debug!(attempt, ?delay, error = %err, "retrying service call");
                        tokio::time::sleep(delay).await;
                    }
                    // Out of backoff budget.
                    None => return Err(err),
                }
                attempt += 1;
            }
        }
    }
}

/// The workflow service RPC surface. Every request carries the worker's
/// `identity` string. Long-poll calls resolve with an empty task token when
/// no work arrived within the poll window.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowExecutionRequest,
    ) -> Result<StartWorkflowExecutionResponse>;

    async fn poll_for_decision_task(
        &self,
        request: PollForDecisionTaskRequest,
    ) -> Result<PollForDecisionTaskResponse>;

    async fn respond_decision_task_completed(
        &self,
        request: RespondDecisionTaskCompletedRequest,
    ) -> Result<()>;

    async fn poll_for_activity_task(
        &self,
        request: PollForActivityTaskRequest,
    ) -> Result<PollForActivityTaskResponse>;

    async fn respond_activity_task_completed(
        &self,
        request: RespondActivityTaskCompletedRequest,
    ) -> Result<()>;

    async fn respond_activity_task_failed(
        &self,
        request: RespondActivityTaskFailedRequest,
    ) -> Result<()>;

    async fn record_activity_task_heartbeat(
        &self,
        request: RecordActivityTaskHeartbeatRequest,
    ) -> Result<RecordActivityTaskHeartbeatResponse>;
}
