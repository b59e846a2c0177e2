use crate::{
    coroutines::Channel,
    errors::{ActivityError, FlowError, WorkflowTaskError},
    protocol::{
        ActivityTaskCompletedEventAttributes, Decision, DecisionAttributes, DecisionType,
        EventAttributes, EventType, HistoryEvent, ScheduleActivityTaskDecisionAttributes,
        TimeoutType, WorkflowType,
    },
    task_token::TaskToken,
    test_help::{
        activity_request, single_activity_factory, TestHistoryBuilder, TEST_TASK_LIST,
        TEST_WORKFLOW_TYPE,
    },
    worker::{terminal_decision_completion, ReplayWorkflowTaskHandler, WorkflowTaskHandler},
    workflow::{
        WorkflowDefinition, WorkflowDefinitionFactory, WorkflowEventHandler, WorkflowFn,
        WorkflowInfo,
    },
};
use rstest::rstest;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

fn workflow_info() -> WorkflowInfo {
    WorkflowInfo {
        workflow_type: WorkflowType {
            name: TEST_WORKFLOW_TYPE.to_owned(),
        },
        task_list: TEST_TASK_LIST.to_owned(),
        ..Default::default()
    }
}

fn handler_for(factory: WorkflowDefinitionFactory) -> WorkflowEventHandler {
    WorkflowEventHandler::new(workflow_info(), factory, terminal_decision_completion())
}

/// Feed events in order and collect the non-nil batches; each batch is what a
/// decision task ending at that event would respond with.
fn run_history(handler: &mut WorkflowEventHandler, events: &[HistoryEvent]) -> Vec<Vec<Decision>> {
    events
        .iter()
        .filter_map(|event| handler.process_event(event).expect("event processing failed"))
        .collect()
}

fn schedule_attrs(decision: &Decision) -> &ScheduleActivityTaskDecisionAttributes {
    match &decision.attributes {
        Some(DecisionAttributes::ScheduleActivityTask(attrs)) => attrs,
        other => panic!("expected schedule attributes, got {other:?}"),
    }
}

fn completion_result(decision: &Decision) -> &[u8] {
    match &decision.attributes {
        Some(DecisionAttributes::CompleteWorkflowExecution(attrs)) => &attrs.result,
        other => panic!("expected completion attributes, got {other:?}"),
    }
}

#[test]
fn single_activity_success_schedules_then_completes() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"x");
    t.add_decision_task_scheduled_and_started();
    t.add_decision_task_completed();
    let scheduled = t.add_activity_task_scheduled("0", "Foo");
    assert_eq!(scheduled, 5);
    t.add_activity_task_started(scheduled);
    t.add_activity_task_completed(scheduled, b"y");

    let mut handler = handler_for(single_activity_factory());
    let responses = run_history(&mut handler, t.events());
    assert_eq!(responses.len(), 2);

    let [schedule] = responses[0].as_slice() else {
        panic!("expected one decision, got {:?}", responses[0]);
    };
    assert_eq!(schedule.decision_type, DecisionType::ScheduleActivityTask);
    let attrs = schedule_attrs(schedule);
    assert_eq!(attrs.activity_id, "0");
    assert_eq!(attrs.activity_type.name, "Foo");
    assert_eq!(attrs.task_list.name, TEST_TASK_LIST);
    assert_eq!(attrs.input, b"x");
    assert_eq!(attrs.schedule_to_close_timeout_seconds, 60);
    assert_eq!(attrs.schedule_to_start_timeout_seconds, 30);
    assert_eq!(attrs.start_to_close_timeout_seconds, 30);
    assert_eq!(attrs.heartbeat_timeout_seconds, 10);

    let [complete] = responses[1].as_slice() else {
        panic!("expected one decision, got {:?}", responses[1]);
    };
    assert_eq!(complete.decision_type, DecisionType::CompleteWorkflowExecution);
    assert_eq!(completion_result(complete), b"y");
}

#[test]
fn single_activity_failure_fails_the_workflow() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"x");
    t.add_decision_task_scheduled_and_started();
    t.add_decision_task_completed();
    let scheduled = t.add_activity_task_scheduled("0", "Foo");
    t.add_activity_task_started(scheduled);
    t.add_activity_task_failed(scheduled, "boom", b"d");

    let mut handler = handler_for(single_activity_factory());
    let responses = run_history(&mut handler, t.events());
    assert_eq!(responses.len(), 2);
    let [fail] = responses[1].as_slice() else {
        panic!("expected one decision, got {:?}", responses[1]);
    };
    assert_eq!(fail.decision_type, DecisionType::FailWorkflowExecution);
    match &fail.attributes {
        Some(DecisionAttributes::FailWorkflowExecution(attrs)) => {
            assert_eq!(attrs.reason, "boom");
            assert_eq!(attrs.details, b"d");
        }
        other => panic!("expected failure attributes, got {other:?}"),
    }
}

fn timeout_tolerant_factory() -> WorkflowDefinitionFactory {
    Arc::new(|_| {
        Ok(WorkflowDefinition::new(WorkflowFn::new(
            |ctx, input| async move {
                match ctx.execute_activity(activity_request("Foo", &input)).await {
                    Ok(result) => Ok(result),
                    Err(ActivityError::TimedOut {
                        timeout_type: TimeoutType::ScheduleToClose,
                    }) => Ok(b"t".to_vec()),
                    Err(err) => Err(err.into()),
                }
            },
        )))
    })
}

#[test]
fn activity_timeout_surfaces_as_typed_error() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"x");
    t.add_decision_task_scheduled_and_started();
    t.add_decision_task_completed();
    let scheduled = t.add_activity_task_scheduled("0", "Foo");
    t.add_activity_task_timed_out(scheduled, TimeoutType::ScheduleToClose);

    let mut handler = handler_for(timeout_tolerant_factory());
    let responses = run_history(&mut handler, t.events());
    assert_eq!(responses.len(), 2);
    let [complete] = responses[1].as_slice() else {
        panic!("expected one decision, got {:?}", responses[1]);
    };
    assert_eq!(completion_result(complete), b"t");
}

fn parallel_activities_factory() -> WorkflowDefinitionFactory {
    Arc::new(|_| {
        Ok(WorkflowDefinition::new(WorkflowFn::new(
            |ctx, _input| async move {
                let first: Channel<Vec<u8>> = ctx.new_buffered_channel("first-result", 1);
                let second: Channel<Vec<u8>> = ctx.new_buffered_channel("second-result", 1);
                let tx = first.clone();
                ctx.spawn(move |child| async move {
                    let r = child
                        .execute_activity(activity_request("First", b""))
                        .await
                        .unwrap_or_default();
                    tx.send(child.coroutine(), r).await;
                });
                let tx = second.clone();
                ctx.spawn(move |child| async move {
                    let r = child
                        .execute_activity(activity_request("Second", b""))
                        .await
                        .unwrap_or_default();
                    tx.send(child.coroutine(), r).await;
                });
                let mut result = first.recv(ctx.coroutine()).await;
                result.extend(second.recv(ctx.coroutine()).await);
                Ok(result)
            },
        )))
    })
}

fn parallel_activities_history() -> TestHistoryBuilder {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"");
    t.add_decision_task_scheduled_and_started();
    t.add_decision_task_completed();
    let first = t.add_activity_task_scheduled("0", "First");
    let second = t.add_activity_task_scheduled("1", "Second");
    t.add_activity_task_completed(first, b"a");
    t.add_activity_task_completed(second, b"b");
    t
}

#[test]
fn parallel_activities_schedule_in_spawn_order_and_join() {
    let t = parallel_activities_history();
    let mut handler = handler_for(parallel_activities_factory());
    let responses = run_history(&mut handler, t.events());
    assert_eq!(responses.len(), 3);

    let [s0, s1] = responses[0].as_slice() else {
        panic!("expected two decisions, got {:?}", responses[0]);
    };
    assert_eq!(schedule_attrs(s0).activity_id, "0");
    assert_eq!(schedule_attrs(s0).activity_type.name, "First");
    assert_eq!(schedule_attrs(s1).activity_id, "1");
    assert_eq!(schedule_attrs(s1).activity_type.name, "Second");

    // The first completion only wakes the join; no new decisions.
    assert!(responses[1].is_empty());

    let [complete] = responses[2].as_slice() else {
        panic!("expected one decision, got {:?}", responses[2]);
    };
    assert_eq!(completion_result(complete), b"ab");
}

fn panicking_factory() -> WorkflowDefinitionFactory {
    Arc::new(|_| {
        Ok(WorkflowDefinition::new(WorkflowFn::new(
            |_ctx, _input| async move { panic!("nope") },
        )))
    })
}

#[test]
fn panicking_workflow_fails_with_captured_stack() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"");

    let mut handler = handler_for(panicking_factory());
    let responses = run_history(&mut handler, t.events());
    assert_eq!(responses.len(), 1);
    let [fail] = responses[0].as_slice() else {
        panic!("expected one decision, got {:?}", responses[0]);
    };
    assert_eq!(fail.decision_type, DecisionType::FailWorkflowExecution);
    match &fail.attributes {
        Some(DecisionAttributes::FailWorkflowExecution(attrs)) => {
            assert_eq!(attrs.reason, "nope");
            assert!(!attrs.details.is_empty(), "stack trace must not be empty");
        }
        other => panic!("expected failure attributes, got {other:?}"),
    }
}

#[test]
fn terminal_event_without_prior_schedule_is_a_processing_error() {
    let mut handler = handler_for(single_activity_factory());
    let event = HistoryEvent::new(
        1,
        EventType::ActivityTaskCompleted,
        Some(EventAttributes::ActivityTaskCompleted(
            ActivityTaskCompletedEventAttributes {
                scheduled_event_id: 999,
                result: Vec::new(),
            },
        )),
    );
    assert!(matches!(
        handler.process_event(&event),
        Err(WorkflowTaskError::UnknownScheduledEvent {
            scheduled_event_id: 999
        })
    ));
    // No decisions leak out of the failed event.
    assert!(handler
        .context()
        .swap_pending_decisions(Vec::new())
        .is_empty());
}

fn duplicate_id_factory() -> WorkflowDefinitionFactory {
    Arc::new(|_| {
        Ok(WorkflowDefinition::new(WorkflowFn::new(
            |ctx, _input| async move {
                for _ in 0..2 {
                    ctx.spawn(move |child| async move {
                        let mut request = activity_request("Foo", b"");
                        request.activity_id = Some("dup".to_owned());
                        let _ = child.execute_activity(request).await;
                    });
                }
                // Never completes; the collision is the point.
                let parked: Channel<()> = ctx.new_buffered_channel("parked", 1);
                parked.recv(ctx.coroutine()).await;
                Ok(Vec::new())
            },
        )))
    })
}

#[test]
fn duplicate_activity_ids_are_rejected() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"");

    let mut handler = handler_for(duplicate_id_factory());
    assert!(matches!(
        handler.process_event(&t.events()[0]),
        Err(WorkflowTaskError::DuplicateActivityId { activity_id }) if activity_id == "dup"
    ));
}

#[test]
fn replaying_identical_history_yields_identical_batches() {
    let t = parallel_activities_history();
    let run = || {
        let mut handler = handler_for(parallel_activities_factory());
        t.events()
            .iter()
            .map(|event| handler.process_event(event).expect("event processing failed"))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

fn immediate_factory() -> WorkflowDefinitionFactory {
    Arc::new(|_| {
        Ok(WorkflowDefinition::new(WorkflowFn::new(
            |_ctx, _input| async move { Ok(b"done".to_vec()) },
        )))
    })
}

#[rstest]
#[case::normal_return(immediate_factory())]
#[case::panic(panicking_factory())]
fn completion_is_reported_exactly_once(#[case] factory: WorkflowDefinitionFactory) {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let mut handler = WorkflowEventHandler::new(
        workflow_info(),
        factory,
        Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"");
    t.add(EventType::WorkflowExecutionCompleted, None);
    for event in t.events() {
        handler.process_event(event).expect("event processing failed");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn decision_task_response_carries_only_the_latest_batch() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"x");
    t.add_decision_task_scheduled_and_started();
    t.add_decision_task_completed();
    let scheduled = t.add_activity_task_scheduled("0", "Foo");
    t.add_activity_task_started(scheduled);
    t.add_activity_task_completed(scheduled, b"y");
    t.add_decision_task_scheduled_and_started();

    let handler = ReplayWorkflowTaskHandler::new(
        TEST_TASK_LIST.to_owned(),
        "test-identity".to_owned(),
        single_activity_factory(),
    );
    let response = handler
        .process_workflow_task(t.as_decision_task(b"tok", TEST_WORKFLOW_TYPE))
        .expect("task processing failed");
    assert_eq!(response.task_token, TaskToken(b"tok".to_vec()));
    assert_eq!(response.identity, "test-identity");
    // Replay regenerated the schedule batch, but only the completion answers
    // this task.
    assert_eq!(response.decisions.len(), 1);
    assert_eq!(
        response.decisions[0].decision_type,
        DecisionType::CompleteWorkflowExecution
    );
    assert_eq!(completion_result(&response.decisions[0]), b"y");
}

#[test]
fn first_decision_task_schedules_the_activity() {
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"x");
    t.add_decision_task_scheduled_and_started();

    let handler = ReplayWorkflowTaskHandler::new(
        TEST_TASK_LIST.to_owned(),
        "test-identity".to_owned(),
        single_activity_factory(),
    );
    let response = handler
        .process_workflow_task(t.as_decision_task(b"tok", TEST_WORKFLOW_TYPE))
        .expect("task processing failed");
    assert_eq!(response.decisions.len(), 1);
    assert_eq!(
        response.decisions[0].decision_type,
        DecisionType::ScheduleActivityTask
    );
}

#[test]
fn empty_decision_tasks_are_rejected() {
    let handler = ReplayWorkflowTaskHandler::new(
        TEST_TASK_LIST.to_owned(),
        "test-identity".to_owned(),
        single_activity_factory(),
    );
    let task = TestHistoryBuilder::default().as_decision_task(b"tok", TEST_WORKFLOW_TYPE);
    assert!(matches!(
        handler.process_workflow_task(task),
        Err(WorkflowTaskError::EmptyHistory)
    ));
}

#[test]
fn definition_factory_errors_propagate_as_processing_errors() {
    let factory: WorkflowDefinitionFactory =
        Arc::new(|workflow_type| Err(FlowError::from_reason(format!(
            "unregistered workflow type: {}",
            workflow_type.name
        ))));
    let mut handler = handler_for(factory);
    let mut t = TestHistoryBuilder::default();
    t.add_workflow_execution_started(b"");
    assert!(matches!(
        handler.process_event(&t.events()[0]),
        Err(WorkflowTaskError::DefinitionFactory { workflow_type, .. }) if workflow_type == TEST_WORKFLOW_TYPE
    ));
}
