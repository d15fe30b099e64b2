#![allow(dead_code)]

use std::time::Duration;

use tokio::time::{sleep, timeout};
use weave_kernel::{
    CommandId, CommandState, EventBody, KernelEvent, SessionHandle, Subscription,
};

const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn next_event(subscription: &mut Subscription) -> KernelEvent {
    timeout(TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("session closed")
}

/// Collects events up to and including the terminal event of `command_id`.
pub async fn take_until_terminal(
    subscription: &mut Subscription,
    command_id: &CommandId,
) -> Vec<KernelEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(subscription).await;
        let done = event.is_terminal() && event.command_id() == Some(command_id);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Takes events until `predicate` matches one, returning that event.
pub async fn take_until(
    subscription: &mut Subscription,
    predicate: impl Fn(&KernelEvent) -> bool,
) -> KernelEvent {
    loop {
        let event = next_event(subscription).await;
        if predicate(&event) {
            return event;
        }
    }
}

pub fn names_for(events: &[KernelEvent], command_id: &CommandId) -> Vec<&'static str> {
    events
        .iter()
        .filter(|event| event.command_id() == Some(command_id))
        .map(|event| event.body().name())
        .collect()
}

pub fn bodies_for(events: &[KernelEvent], command_id: &CommandId) -> Vec<String> {
    events
        .iter()
        .filter(|event| event.command_id() == Some(command_id))
        .map(|event| event.body().to_string())
        .collect()
}

pub fn is_input_request(event: &KernelEvent) -> bool {
    matches!(event.body(), EventBody::InputRequested(_))
}

pub async fn wait_for_state(handle: &SessionHandle, command_id: &CommandId, expected: CommandState) {
    timeout(TIMEOUT, async {
        while handle.command_state(command_id).await != Some(expected) {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("command never reached the expected state");
}
