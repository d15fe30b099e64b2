mod utils;

use std::sync::Arc;

use googletest::prelude::*;
use mock_kernel::MockKernel;
use serde_json::Value;
use utils::{
    bodies_for, is_input_request, names_for, take_until, take_until_terminal, wait_for_state,
};
use weave_formatting::{FormatError, Formatter, HTML, PLAIN_TEXT};
use weave_kernel::{
    event::ErrorKind, launch, launch_with_formatter, BusyPolicy, CommandId, CommandState,
    CompositeKernel, EventBody, KernelCommand, KernelEvent, SessionConfig, SubmitError,
};

/// Plain text in capitals; nothing else.
struct Shouting;

impl Formatter for Shouting {
    fn render(&self, value: &Value, mime_type: &str) -> std::result::Result<String, FormatError> {
        match (mime_type, value) {
            (PLAIN_TEXT, Value::String(text)) => Ok(text.to_uppercase()),
            (PLAIN_TEXT, other) => Ok(other.to_string()),
            (other, _) => Err(FormatError::UnsupportedMimeType(other.to_string())),
        }
    }
}

fn owners_and_names(events: &[KernelEvent]) -> Vec<(Option<CommandId>, &'static str)> {
    events
        .iter()
        .map(|event| (event.command_id().cloned(), event.body().name()))
        .collect()
}

fn reject_when_busy() -> SessionConfig {
    SessionConfig {
        busy_policy: BusyPolicy::Reject,
        ..SessionConfig::default()
    }
}

#[googletest::test]
#[tokio::test]
async fn session_processes_a_command_successfully() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let command = KernelCommand::submit_code("1");

    let submit_result = handle.submit(command.clone()).await;
    let seen = take_until_terminal(&mut events, command.id()).await;

    expect_that!(submit_result, ok(eq(())));
    expect_that!(
        bodies_for(&seen, command.id()),
        elements_are![
            eq("CodeSubmissionReceived: code='1'"),
            eq("ValueProduced: text/plain='1'"),
            eq("CommandCompleted"),
        ]
    );
    expect_that!(
        handle.command_state(command.id()).await,
        some(eq(CommandState::Completed))
    );
}

#[googletest::test]
#[tokio::test]
async fn replaying_subscriber_starts_with_kernel_ready() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let command = KernelCommand::submit_code("1");
    let mut live = handle.subscribe(false);
    handle.submit(command.clone()).await.unwrap();
    take_until_terminal(&mut live, command.id()).await;

    let mut late = handle.subscribe(true);
    let replayed = take_until_terminal(&mut late, command.id()).await;

    expect_that!(replayed[0].body(), eq(&EventBody::KernelReady));
    expect_that!(replayed[0].command_id(), none());
    expect_that!(
        names_for(&replayed, command.id()),
        elements_are![
            eq("CodeSubmissionReceived"),
            eq("ValueProduced"),
            eq("CommandCompleted")
        ]
    );
}

#[googletest::test]
#[tokio::test]
async fn execution_fault_fails_the_command_but_not_the_session() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let buggy = KernelCommand::submit_code("buggy");
    let next = KernelCommand::submit_code("2");

    handle.submit(buggy.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, buggy.id()).await;
    handle.submit(next.clone()).await.unwrap();
    let after = take_until_terminal(&mut events, next.id()).await;

    expect_that!(
        bodies_for(&seen, buggy.id()),
        elements_are![
            eq("CodeSubmissionReceived: code='buggy'"),
            eq("StandardOutputProduced: text='Syntax error'"),
            eq("ErrorProduced: kind='ExecutionFault' message='Syntax error'"),
            eq("CommandFailed: message='Syntax error'"),
        ]
    );
    expect_that!(
        handle.command_state(buggy.id()).await,
        some(eq(CommandState::Failed))
    );
    expect_that!(after.last().map(|e| e.body().name()), some(eq("CommandCompleted")));
}

#[googletest::test]
#[tokio::test]
async fn kernel_panic_is_reported_as_an_event() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let command = KernelCommand::submit_code("panic");
    let next = KernelCommand::submit_code("3");

    handle.submit(command.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, command.id()).await;
    handle.submit(next.clone()).await.unwrap();
    let after = take_until_terminal(&mut events, next.id()).await;

    let error = seen
        .iter()
        .find_map(|event| match event.body() {
            EventBody::ErrorProduced(error) => Some(error.kind),
            _ => None,
        });
    expect_that!(error, some(eq(ErrorKind::ExecutionFault)));
    expect_that!(seen.last().map(|e| e.body().name()), some(eq("CommandFailed")));
    expect_that!(after.last().map(|e| e.body().name()), some(eq("CommandCompleted")));
}

#[googletest::test]
#[tokio::test]
async fn commands_are_routed_by_target_kernel_name() {
    let kernel = CompositeKernel::new("root")
        .add(MockKernel::named("csharp"))
        .add(MockKernel::named("fsharp"));
    let handle = launch(Arc::new(kernel), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let command = KernelCommand::submit_code("1").with_target_kernel("fsharp");

    handle.submit(command.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, command.id()).await;

    expect_that!(seen.last().map(|e| e.body().name()), some(eq("CommandCompleted")));
}

#[googletest::test]
#[tokio::test]
async fn unknown_target_kernel_yields_a_single_kernel_not_found_error() {
    let kernel = CompositeKernel::new("root").add(MockKernel::named("csharp"));
    let handle = launch(Arc::new(kernel), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let lost = KernelCommand::submit_code("1").with_target_kernel("X");
    let next = KernelCommand::submit_code("2");

    handle.submit(lost.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, lost.id()).await;
    handle.submit(next.clone()).await.unwrap();
    let after = take_until_terminal(&mut events, next.id()).await;

    let errors: Vec<_> = seen
        .iter()
        .filter_map(|event| match event.body() {
            EventBody::ErrorProduced(error) => Some(error.kind),
            _ => None,
        })
        .collect();
    expect_that!(errors, elements_are![eq(ErrorKind::KernelNotFound)]);
    expect_that!(seen.last().map(|e| e.body().name()), some(eq("CommandFailed")));
    expect_that!(after.last().map(|e| e.body().name()), some(eq("CommandCompleted")));
}

#[googletest::test]
#[tokio::test]
async fn busy_session_queues_commands_in_dispatch_order() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let first = KernelCommand::submit_code("slow 1");
    let second = KernelCommand::submit_code("slow 2");

    handle.submit(first.clone()).await.unwrap();
    handle.submit(second.clone()).await.unwrap();
    let queued_state = handle.command_state(second.id()).await;
    let seen = take_until_terminal(&mut events, second.id()).await;

    expect_that!(queued_state, some(eq(CommandState::Queued)));
    let owners: Vec<_> = seen
        .iter()
        .map(|event| event.command_id().cloned())
        .collect();
    let first_owned = owners
        .iter()
        .take_while(|owner| owner.as_ref() == Some(first.id()))
        .count();
    expect_that!(first_owned, eq(3));
    expect_that!(
        names_for(&seen, second.id()),
        elements_are![
            eq("CodeSubmissionReceived"),
            eq("ValueProduced"),
            eq("CommandCompleted")
        ]
    );
}

#[googletest::test]
#[tokio::test]
async fn only_one_command_runs_at_a_time() {
    let kernel = MockKernel::new();
    let handle = launch(kernel.clone(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let commands: Vec<_> = (0..4)
        .map(|n| KernelCommand::submit_code(format!("slow {n}")))
        .collect();

    for command in &commands {
        handle.submit(command.clone()).await.unwrap();
    }
    take_until_terminal(&mut events, commands[3].id()).await;

    expect_that!(kernel.max_concurrency(), eq(1));
}

#[googletest::test]
#[tokio::test]
async fn busy_session_rejects_when_configured_to() {
    let handle = launch(MockKernel::new(), reject_when_busy());
    let mut events = handle.subscribe(false);
    let running = KernelCommand::submit_code("slow");
    let rejected = KernelCommand::submit_code("1");

    handle.submit(running.clone()).await.unwrap();
    let result = handle.submit(rejected.clone()).await;
    let seen = take_until_terminal(&mut events, running.id()).await;

    expect_that!(result, err(eq(SubmitError::SessionBusy(running.id().clone()))));
    expect_that!(names_for(&seen, rejected.id()), empty());
    expect_that!(handle.command_state(rejected.id()).await, none());
}

#[googletest::test]
#[tokio::test]
async fn full_queue_reports_busy() {
    let config = SessionConfig {
        queue_capacity: 1,
        ..SessionConfig::default()
    };
    let handle = launch(MockKernel::new(), config);
    let running = KernelCommand::submit_code("slow");
    let queued = KernelCommand::submit_code("1");
    let overflow = KernelCommand::submit_code("2");

    handle.submit(running.clone()).await.unwrap();
    handle.submit(queued).await.unwrap();
    let result = handle.submit(overflow).await;

    expect_that!(result, err(eq(SubmitError::SessionBusy(running.id().clone()))));
}

#[googletest::test]
#[tokio::test]
async fn duplicate_command_id_is_rejected_while_in_flight() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let command = KernelCommand::submit_code("slow").with_id("same");
    let duplicate = KernelCommand::submit_code("1").with_id("same");

    handle.submit(command).await.unwrap();
    let result = handle.submit(duplicate).await;

    expect_that!(
        matches!(result, Err(SubmitError::InvalidArgument(ref e)) if e.argument == "id"),
        eq(true)
    );
}

#[googletest::test]
#[tokio::test]
async fn suspended_session_does_not_block_other_sessions() {
    let waiting = launch(MockKernel::new(), SessionConfig::default());
    let other = launch(MockKernel::new(), SessionConfig::default());
    let mut waiting_events = waiting.subscribe(false);
    let mut other_events = other.subscribe(false);
    let read = KernelCommand::submit_code("readLine()");
    let command = KernelCommand::submit_code("1");

    waiting.submit(read.clone()).await.unwrap();
    take_until(&mut waiting_events, is_input_request).await;
    other.submit(command.clone()).await.unwrap();
    let seen = take_until_terminal(&mut other_events, command.id()).await;

    expect_that!(seen.last().map(|e| e.body().name()), some(eq("CommandCompleted")));
    wait_for_state(&waiting, read.id(), CommandState::Suspended).await;
}

#[googletest::test]
#[tokio::test]
async fn submission_stays_queued_while_the_active_command_is_suspended() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let reading = KernelCommand::submit_code("readLine()");
    let waiting = KernelCommand::submit_code("1");

    handle.submit(reading.clone()).await.unwrap();
    take_until(&mut events, is_input_request).await;
    handle.submit(waiting.clone()).await.unwrap();

    expect_that!(
        handle.command_state(reading.id()).await,
        some(eq(CommandState::Suspended))
    );
    expect_that!(
        handle.command_state(waiting.id()).await,
        some(eq(CommandState::Queued))
    );

    let reply = KernelCommand::send_input(reading.id(), "42");
    handle.submit(reply.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, waiting.id()).await;

    expect_that!(
        owners_and_names(&seen),
        elements_are![
            eq((Some(reading.id().clone()), "ValueProduced")),
            eq((Some(reading.id().clone()), "CommandCompleted")),
            eq((Some(reply.id().clone()), "CommandCompleted")),
            eq((Some(waiting.id().clone()), "CodeSubmissionReceived")),
            eq((Some(waiting.id().clone()), "ValueProduced")),
            eq((Some(waiting.id().clone()), "CommandCompleted")),
        ]
    );
}

#[googletest::test]
#[tokio::test]
async fn values_are_rendered_by_the_session_formatter() {
    let config = SessionConfig {
        mime_types: vec![PLAIN_TEXT.to_string(), HTML.to_string()],
        ..SessionConfig::default()
    };
    let handle = launch_with_formatter(MockKernel::new(), config, Arc::new(Shouting));
    let mut events = handle.subscribe(false);
    let command = KernelCommand::submit_code("quiet please");

    handle.submit(command.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, command.id()).await;

    // The formatter has no HTML rendering, so only plain text is produced
    expect_that!(
        bodies_for(&seen, command.id()),
        elements_are![
            eq("CodeSubmissionReceived: code='quiet please'"),
            eq("ValueProduced: text/plain='QUIET PLEASE'"),
            eq("CommandCompleted"),
        ]
    );
}

#[googletest::test]
#[tokio::test]
async fn huge_capacities_are_only_bounds() {
    let config = SessionConfig {
        queue_capacity: usize::MAX,
        replay_capacity: usize::MAX,
        ..SessionConfig::default()
    };
    let handle = launch(MockKernel::new(), config);
    let mut events = handle.subscribe(true);
    let command = KernelCommand::submit_code("1");

    handle.submit(command.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, command.id()).await;

    expect_that!(seen.first().map(|e| e.body().name()), some(eq("KernelReady")));
    expect_that!(seen.last().map(|e| e.body().name()), some(eq("CommandCompleted")));
}

#[googletest::test]
#[tokio::test]
async fn control_command_ids_are_tracked_until_their_terminal_event() {
    let handle = launch(MockKernel::new(), SessionConfig::default());
    let mut events = handle.subscribe(false);
    let expensive = KernelCommand::submit_code("expensive_op");
    let stray = KernelCommand::send_input(expensive.id(), "early").with_id("reply");
    let duplicate = KernelCommand::send_input(expensive.id(), "again").with_id("reply");
    let cancel = KernelCommand::cancel();

    handle.submit(expensive.clone()).await.unwrap();
    handle.submit(stray.clone()).await.unwrap();
    let in_flight = handle.command_state(stray.id()).await;
    let result = handle.submit(duplicate).await;
    handle.submit(cancel.clone()).await.unwrap();
    let seen = take_until_terminal(&mut events, cancel.id()).await;

    expect_that!(in_flight, some(eq(CommandState::Running)));
    expect_that!(
        matches!(result, Err(SubmitError::InvalidArgument(ref e)) if e.argument == "id"),
        eq(true)
    );
    expect_that!(names_for(&seen, stray.id()), elements_are![eq("CommandFailed")]);
    expect_that!(
        handle.command_state(stray.id()).await,
        some(eq(CommandState::Failed))
    );
    expect_that!(
        handle.command_state(cancel.id()).await,
        some(eq(CommandState::Completed))
    );
}
