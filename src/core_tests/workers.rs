use crate::{
    errors::FlowError,
    protocol::{
        ActivityType, DecisionType, PollForActivityTaskResponse, PollForDecisionTaskResponse,
        RespondDecisionTaskCompletedRequest, WorkflowType,
    },
    task_token::TaskToken,
    test_help::{
        single_activity_factory, MockWorkflowService, TestHistoryBuilder, TEST_TASK_LIST,
        TEST_WORKFLOW_TYPE,
    },
    worker::{
        Activity, ActivityExecutionContext, ActivityRegistry, ActivityWorker,
        StartWorkflowOptions, WorkerConfig, WorkerOverrides, WorkflowClient, WorkflowTaskHandler,
        WorkflowWorker,
    },
    WorkflowTaskError,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..400 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    bail!("condition not met within two seconds")
}

#[tokio::test(flavor = "multi_thread")]
async fn workflow_worker_polls_replays_and_responds() -> Result<()> {
    let service = Arc::new(MockWorkflowService::default());
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"x");
    t.add_decision_task_scheduled_and_started();
    service
        .decision_tasks
        .lock()
        .push_back(t.as_decision_task(b"tok-1", TEST_WORKFLOW_TYPE));

    let mut worker = WorkflowWorker::new(
        WorkerConfig::new(TEST_TASK_LIST),
        single_activity_factory(),
        service.clone(),
    );
    worker.start();
    wait_until(|| !service.decision_responses.lock().is_empty()).await?;
    worker.shutdown().await;

    let responses = service.decision_responses.lock();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].task_token, TaskToken(b"tok-1".to_vec()));
    assert_eq!(responses[0].decisions.len(), 1);
    assert_eq!(
        responses[0].decisions[0].decision_type,
        DecisionType::ScheduleActivityTask
    );
    assert!(responses[0].identity.contains(TEST_TASK_LIST));
    Ok(())
}

struct CannedHandler;

impl WorkflowTaskHandler for CannedHandler {
    fn process_workflow_task(
        &self,
        task: PollForDecisionTaskResponse,
    ) -> std::result::Result<RespondDecisionTaskCompletedRequest, WorkflowTaskError> {
        Ok(RespondDecisionTaskCompletedRequest {
            task_token: task.task_token,
            decisions: Vec::new(),
            identity: "canned".to_owned(),
        })
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_overrides_replace_the_default_task_handler() -> Result<()> {
    let service = Arc::new(MockWorkflowService::default());
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"");
    service
        .decision_tasks
        .lock()
        .push_back(t.as_decision_task(b"tok-2", TEST_WORKFLOW_TYPE));

    let mut worker = WorkflowWorker::new_with_overrides(
        WorkerConfig::new(TEST_TASK_LIST),
        single_activity_factory(),
        service.clone(),
        WorkerOverrides {
            workflow_task_handler: Some(Arc::new(CannedHandler)),
            activity_task_handler: None,
        },
    );
    worker.start();
    wait_until(|| !service.decision_responses.lock().is_empty()).await?;
    worker.shutdown().await;

    assert_eq!(service.decision_responses.lock()[0].identity, "canned");
    Ok(())
}

struct Uppercase;

#[async_trait]
impl Activity for Uppercase {
    async fn execute(
        &self,
        ctx: ActivityExecutionContext,
        input: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, FlowError> {
        ctx.record_heartbeat(b"alive".to_vec())
            .await
            .map_err(|e| FlowError::from_reason(e.to_string()))?;
        Ok(input.to_ascii_uppercase())
    }
}

struct AlwaysFails;

#[async_trait]
impl Activity for AlwaysFails {
    async fn execute(
        &self,
        _ctx: ActivityExecutionContext,
        _input: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, FlowError> {
        Err(FlowError::new("boom", b"d".to_vec()))
    }
}

fn activity_task(token: &[u8], activity_type: &str, input: &[u8]) -> PollForActivityTaskResponse {
    PollForActivityTaskResponse {
        task_token: TaskToken(token.to_vec()),
        activity_id: "0".to_owned(),
        activity_type: Some(ActivityType {
            name: activity_type.to_owned(),
        }),
        input: input.to_vec(),
        workflow_execution: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn activity_worker_executes_heartbeats_and_reports_completion() -> Result<()> {
    let service = Arc::new(MockWorkflowService::default());
    service
        .activity_tasks
        .lock()
        .push_back(activity_task(b"tok-a", "Uppercase", b"abc"));

    let mut registry = ActivityRegistry::new();
    registry.register("Uppercase", Uppercase);
    let mut worker = ActivityWorker::new(
        WorkerConfig::new(TEST_TASK_LIST),
        registry.into_factory(),
        service.clone(),
    );
    worker.start();
    wait_until(|| !service.activity_completions.lock().is_empty()).await?;
    worker.shutdown().await;

    let completions = service.activity_completions.lock();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].task_token, TaskToken(b"tok-a".to_vec()));
    assert_eq!(completions[0].result, b"ABC");

    let heartbeats = service.heartbeats.lock();
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0].details, b"alive");
    assert_eq!(heartbeats[0].task_token, TaskToken(b"tok-a".to_vec()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn activity_worker_reports_failures_and_unknown_types() -> Result<()> {
    let service = Arc::new(MockWorkflowService::default());
    {
        let mut tasks = service.activity_tasks.lock();
        tasks.push_back(activity_task(b"tok-b", "Fails", b""));
        tasks.push_back(activity_task(b"tok-c", "Missing", b""));
    }

    let mut registry = ActivityRegistry::new();
    registry.register("Fails", AlwaysFails);
    let mut worker = ActivityWorker::new(
        WorkerConfig::new(TEST_TASK_LIST),
        registry.into_factory(),
        service.clone(),
    );
    worker.start();
    wait_until(|| service.activity_failures.lock().len() == 2).await?;
    worker.shutdown().await;

    let failures = service.activity_failures.lock();
    assert_eq!(failures[0].reason, "boom");
    assert_eq!(failures[0].details, b"d");
    assert_eq!(failures[1].reason, "unregistered activity type: Missing");
    Ok(())
}

#[tokio::test]
async fn workflow_client_starts_executions_with_a_generated_identity() -> Result<()> {
    let service = Arc::new(MockWorkflowService::default());
    let client = WorkflowClient::new(
        StartWorkflowOptions {
            workflow_id: "wf-1".to_owned(),
            workflow_type: WorkflowType {
                name: TEST_WORKFLOW_TYPE.to_owned(),
            },
            task_list: TEST_TASK_LIST.to_owned(),
            input: b"x".to_vec(),
            execution_start_to_close_timeout_seconds: 3600,
            decision_task_start_to_close_timeout_seconds: 10,
            identity: String::new(),
        },
        service.clone(),
    );
    let execution = client.start_workflow_execution().await?;
    assert_eq!(execution.workflow_id, "wf-1");
    assert_eq!(execution.run_id, "run-1");

    let requests = service.start_requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].input, b"x");
    assert!(requests[0].identity.contains(TEST_TASK_LIST));
    Ok(())
}
