use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::{
    sync::{mpsc, oneshot},
    task::{self, JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use weave_formatting::{DefaultFormatter, Formatter, FormatterConfig};

use crate::{
    command::{CommandBody, SubmitCode},
    config::{BusyPolicy, SessionConfig},
    event::{
        CancellationIgnored, CodeSubmissionReceived, CommandFailed, ErrorKind, ErrorProduced,
        InputRequested,
    },
    kernel::InputRequest,
    message_queue::MessageQueue,
    CommandId, EventBody, EventBus, InvalidArgument, Kernel, KernelCommand, KernelContext, KernelError,
    KernelEvent, Subscription, SubmitError,
};

/// Terminal states of recently finished commands kept for `command_state`.
const FINISHED_HISTORY: usize = 64;

/// Handle messages buffered ahead of the dispatcher. Each submitter waits for
/// its answer, so this only bounds how many handles can be mid-submit.
const MESSAGE_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Queued,
    Running,
    /// Waiting for a reply to an `InputRequested` event.
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn ended_by(body: &EventBody) -> Option<Self> {
        match body {
            EventBody::CommandCompleted => Some(Self::Completed),
            EventBody::CommandFailed(_) => Some(Self::Failed),
            EventBody::CommandCancelled => Some(Self::Cancelled),
            _ => None,
        }
    }
}

enum SessionMessage {
    Submit {
        command: KernelCommand,
        responds_to: oneshot::Sender<Result<(), SubmitError>>,
    },
    GetState {
        command_id: CommandId,
        responds_to: oneshot::Sender<Option<CommandState>>,
    },
}

/// Front door of a running session. Cheap to clone; the session shuts down
/// once every handle is dropped and in-flight work has drained.
#[derive(Clone)]
pub struct SessionHandle {
    message_sender: mpsc::Sender<SessionMessage>,
    bus: Arc<EventBus>,
}

impl SessionHandle {
    /// Hands a command to the dispatcher. Resolves once the dispatcher has
    /// accepted it (started, queued or applied), not when it finishes.
    pub async fn submit(&self, command: KernelCommand) -> Result<(), SubmitError> {
        command.validate()?;

        let (responds_to, response) = oneshot::channel();
        self.message_sender
            .send(SessionMessage::Submit {
                command,
                responds_to,
            })
            .await
            .map_err(|_| SubmitError::SessionClosed)?;

        response.await.map_err(|_| SubmitError::SessionClosed)?
    }

    /// State of a queued, in-flight or recently finished command.
    pub async fn command_state(&self, command_id: &CommandId) -> Option<CommandState> {
        let (responds_to, response) = oneshot::channel();
        self.message_sender
            .send(SessionMessage::GetState {
                command_id: command_id.clone(),
                responds_to,
            })
            .await
            .ok()?;

        response.await.ok().flatten()
    }

    pub fn subscribe(&self, replay: bool) -> Subscription {
        self.bus.subscribe(replay)
    }
}

pub fn launch(kernel: Arc<dyn Kernel>, config: SessionConfig) -> SessionHandle {
    launch_with_formatter(kernel, config, Arc::new(DefaultFormatter))
}

pub fn launch_with_formatter(
    kernel: Arc<dyn Kernel>,
    config: SessionConfig,
    formatter: Arc<dyn Formatter>,
) -> SessionHandle {
    let (message_sender, message_receiver) = mpsc::channel(MESSAGE_BUFFER);
    let (input_sender, input_receiver) = mpsc::channel(1);

    let bus = Arc::new(EventBus::new(config.replay_capacity));
    let mut formatting = FormatterConfig::new(formatter, config.mime_types.clone());
    for mime_type in formatting.retain_supported() {
        warn!(mime_type = %mime_type, "formatter cannot render mime type, leaving it out");
    }

    let dispatcher = Dispatcher {
        kernel,
        bus: bus.clone(),
        formatting,
        input_sender,
        shutdown: CancellationToken::new(),
        commands: CommandTable::default(),
        queue: MessageQueue::with_capacity(config.queue_capacity),
        active: None,
        accepting: true,
        config,
    };

    info!(
        kernel = dispatcher.kernel.name(),
        mime_types = ?dispatcher.formatting.mime_types(),
        "session started"
    );
    bus.publish(KernelEvent::from_parts(None, EventBody::KernelReady));

    task::spawn(dispatcher.run(message_receiver, input_receiver));

    SessionHandle {
        message_sender,
        bus,
    }
}

struct Queued {
    command: Arc<KernelCommand>,
    submission: SubmitCode,
}

/// Work owed to control commands once the active command has finished.
enum Deferred {
    Event(KernelEvent),
    /// A cancel aimed at the active command, answered according to how it
    /// ended.
    CancelAck(CommandId),
}

struct PendingInput {
    request: InputRequested,
    responds_to: oneshot::Sender<String>,
}

struct ActiveCommand {
    command: Arc<KernelCommand>,
    cancellation: CancellationToken,
    pending_input: Option<PendingInput>,
    deferred: Vec<Deferred>,
    execution: JoinHandle<Result<(), KernelError>>,
}

/// Commands keyed by id. Parents are looked up here; no command owns another.
#[derive(Default)]
struct CommandTable {
    live: HashMap<CommandId, (Arc<KernelCommand>, CommandState)>,
    finished: VecDeque<(CommandId, CommandState)>,
}

impl CommandTable {
    fn contains(&self, id: &CommandId) -> bool {
        self.live.contains_key(id)
    }

    fn insert(&mut self, command: Arc<KernelCommand>, state: CommandState) {
        self.live.insert(command.id().clone(), (command, state));
    }

    fn set_state(&mut self, id: &CommandId, state: CommandState) {
        if let Some((_, current)) = self.live.get_mut(id) {
            debug!(command_id = %id, from = ?current, to = ?state, "command state changed");
            *current = state;
        }
    }

    fn get(&self, id: &CommandId) -> Option<&Arc<KernelCommand>> {
        self.live.get(id).map(|(command, _)| command)
    }

    fn state(&self, id: &CommandId) -> Option<CommandState> {
        self.live.get(id).map(|(_, state)| *state).or_else(|| {
            self.finished
                .iter()
                .rev()
                .find(|(finished, _)| finished == id)
                .map(|(_, state)| *state)
        })
    }

    /// Moves a live command to the finished history. Ids that are not live
    /// are left alone.
    fn finish(&mut self, id: &CommandId, state: CommandState) {
        self.set_state(id, state);
        if self.live.remove(id).is_none() {
            return;
        }
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((id.clone(), state));
    }
}

struct Dispatcher {
    kernel: Arc<dyn Kernel>,
    bus: Arc<EventBus>,
    config: SessionConfig,
    formatting: FormatterConfig,
    input_sender: mpsc::Sender<InputRequest>,
    shutdown: CancellationToken,
    commands: CommandTable,
    queue: MessageQueue<Queued>,
    active: Option<ActiveCommand>,
    /// False once every handle is gone. Nothing can reply to input requests
    /// from then on.
    accepting: bool,
}

async fn join_active(
    active: &mut Option<ActiveCommand>,
) -> Result<Result<(), KernelError>, JoinError> {
    match active {
        Some(active) => (&mut active.execution).await,
        None => std::future::pending().await,
    }
}

impl Dispatcher {
    async fn run(
        mut self,
        mut message_receiver: mpsc::Receiver<SessionMessage>,
        mut input_receiver: mpsc::Receiver<InputRequest>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(request) = input_receiver.recv() => self.handle_input_request(request),
                outcome = join_active(&mut self.active) => self.finish_active(outcome),
                message = message_receiver.recv(), if self.accepting => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => self.stop_accepting(),
                    }
                }
            }

            if !self.accepting && self.active.is_none() && self.queue.size() == 0 {
                break;
            }
        }

        self.shutdown.cancel();
        info!("session shut down");
    }

    fn stop_accepting(&mut self) {
        self.accepting = false;
        if let Some(active) = self.active.as_mut() {
            if active.pending_input.take().is_some() {
                debug!(command_id = %active.command.id(), "cancelling command left waiting for input");
                active.cancellation.cancel();
            }
        }
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Submit {
                command,
                responds_to,
            } => {
                let result = self.submit(command);
                if let Err(e) = &result {
                    warn!(error = %e, "submission rejected");
                }
                let _ = responds_to.send(result);
            }
            SessionMessage::GetState {
                command_id,
                responds_to,
            } => {
                let _ = responds_to.send(self.commands.state(&command_id));
            }
        }
    }

    fn submit(&mut self, command: KernelCommand) -> Result<(), SubmitError> {
        command.validate()?;
        if self.commands.contains(command.id()) {
            return Err(InvalidArgument {
                argument: "id",
                reason: "a command with this id is already in flight",
            }
            .into());
        }

        let command = Arc::new(command);
        debug!(command = %command, "command dispatched");

        // Control commands stay live until their terminal event is out, which
        // may wait behind the active command.
        if command.is_control() {
            self.commands.insert(command.clone(), CommandState::Running);
        }

        match command.body().clone() {
            CommandBody::SubmitCode(submission) => self.submit_code(command, submission),
            CommandBody::SendInput(input) => {
                self.send_input(&command, input.value);
                Ok(())
            }
            CommandBody::Cancel => {
                match command.parent_command_id() {
                    Some(target) => self.cancel_one(&command, target),
                    None => self.cancel_all(&command),
                }
                Ok(())
            }
        }
    }

    fn submit_code(
        &mut self,
        command: Arc<KernelCommand>,
        submission: SubmitCode,
    ) -> Result<(), SubmitError> {
        let busy = self
            .active
            .as_ref()
            .map(|active| SubmitError::SessionBusy(active.command.id().clone()));
        let Some(busy) = busy else {
            self.start(command, submission);
            return Ok(());
        };

        if self.config.busy_policy == BusyPolicy::Reject {
            return Err(busy);
        }

        let queued = Queued {
            command: command.clone(),
            submission,
        };
        if self.queue.push(queued).is_err() {
            debug!(capacity = self.queue.capacity(), "queue is full");
            return Err(busy);
        }
        self.commands.insert(command, CommandState::Queued);
        Ok(())
    }

    fn start(&mut self, command: Arc<KernelCommand>, submission: SubmitCode) {
        self.commands.insert(command.clone(), CommandState::Running);
        self.bus.publish(KernelEvent::caused_by(
            command.id(),
            EventBody::CodeSubmissionReceived(CodeSubmissionReceived {
                code: submission.code.clone(),
            }),
        ));

        let cancellation = self.shutdown.child_token();
        let mut context = KernelContext::new(
            command.clone(),
            self.bus.clone(),
            self.input_sender.clone(),
            cancellation.clone(),
            self.formatting.clone(),
        );

        let kernel = self.kernel.clone();
        let execution =
            task::spawn(async move { kernel.submit_code(&submission, &mut context).await });

        self.active = Some(ActiveCommand {
            command,
            cancellation,
            pending_input: None,
            deferred: Vec::new(),
            execution,
        });
    }

    fn start_next(&mut self) {
        if let Some(next) = self.queue.pop() {
            self.start(next.command, next.submission);
        }
    }

    fn handle_input_request(&mut self, request: InputRequest) {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.command.id() == &request.command_id)
        else {
            // Dropping the responder resumes the kernel with a cancellation.
            warn!(command_id = %request.command_id, "input requested by a command that is not active");
            return;
        };
        if active.cancellation.is_cancelled() {
            return;
        }
        if !self.accepting {
            debug!(command_id = %request.command_id, "no one left to answer input request");
            active.cancellation.cancel();
            return;
        }

        self.commands
            .set_state(&request.command_id, CommandState::Suspended);
        self.bus.publish(KernelEvent::caused_by(
            &request.command_id,
            EventBody::InputRequested(request.request.clone()),
        ));
        active.pending_input = Some(PendingInput {
            request: request.request,
            responds_to: request.responds_to,
        });
    }

    /// Resolves the pending input request of the reply's parent.
    fn send_input(&mut self, reply: &KernelCommand, value: String) {
        let Some(parent) = reply.parent_command_id() else {
            self.publish_or_defer(KernelEvent::caused_by(
                reply.id(),
                EventBody::CommandFailed(CommandFailed {
                    message: "reply has no parent command".to_string(),
                }),
            ));
            return;
        };

        let pending = match (self.commands.state(parent), self.active.as_mut()) {
            (Some(CommandState::Suspended), Some(active)) if active.command.id() == parent => {
                active.pending_input.take()
            }
            _ => None,
        };

        let Some(pending) = pending else {
            warn!(command_id = %reply.id(), parent = %parent, "reply matches no pending input request");
            self.publish_or_defer(KernelEvent::caused_by(
                reply.id(),
                EventBody::CommandFailed(CommandFailed {
                    message: format!("no pending input request for command {parent}"),
                }),
            ));
            return;
        };

        if let Some(original) = self.commands.get(parent) {
            debug!(reply = %reply.id(), original = %original, "input request resolved");
        }
        if pending.request.resolve(value.clone()).is_err() {
            warn!(parent = %parent, "input request was already resolved");
        }
        let _ = pending.responds_to.send(value);
        self.commands.set_state(parent, CommandState::Running);

        self.publish_or_defer(KernelEvent::caused_by(
            reply.id(),
            EventBody::CommandCompleted,
        ));
    }

    fn cancel_one(&mut self, cancel: &KernelCommand, target: &CommandId) {
        if let Some(active) = self
            .active
            .as_mut()
            .filter(|active| active.command.id() == target)
        {
            debug!(command_id = %target, "cancelling active command");
            active.cancellation.cancel();
            active.pending_input = None;
            active
                .deferred
                .push(Deferred::CancelAck(cancel.id().clone()));
            return;
        }

        if let Some(queued) = self
            .queue
            .remove_first(|queued| queued.command.id() == target)
        {
            self.drop_queued(queued);
        } else {
            self.publish_or_defer(cancellation_ignored(cancel, Some(target)));
        }
        self.publish_or_defer(KernelEvent::caused_by(
            cancel.id(),
            EventBody::CommandCompleted,
        ));
    }

    /// Interrupts the active command and drops everything queued behind it.
    fn cancel_all(&mut self, cancel: &KernelCommand) {
        let dropped: Vec<Queued> = self.queue.drain().collect();
        let nothing_to_cancel = dropped.is_empty() && self.active.is_none();
        for queued in dropped {
            self.drop_queued(queued);
        }

        if let Some(active) = self.active.as_mut() {
            debug!(command_id = %active.command.id(), "cancelling active command");
            active.cancellation.cancel();
            active.pending_input = None;
            active
                .deferred
                .push(Deferred::CancelAck(cancel.id().clone()));
            return;
        }

        if nothing_to_cancel {
            self.publish_or_defer(cancellation_ignored(cancel, None));
        }
        self.publish_or_defer(KernelEvent::caused_by(
            cancel.id(),
            EventBody::CommandCompleted,
        ));
    }

    fn drop_queued(&mut self, queued: Queued) {
        let id = queued.command.id();
        self.commands.finish(id, CommandState::Cancelled);
        self.publish_or_defer(KernelEvent::caused_by(id, EventBody::CommandCancelled));
    }

    /// Events of other commands wait behind the active command's terminal
    /// event so that commands appear on the bus in dispatch order.
    fn publish_or_defer(&mut self, event: KernelEvent) {
        match self.active.as_mut() {
            Some(active) => active.deferred.push(Deferred::Event(event)),
            None => self.publish(event),
        }
    }

    /// Publishes `event`, retiring its command first if the event ends it.
    fn publish(&mut self, event: KernelEvent) {
        let ended = CommandState::ended_by(event.body());
        if let (Some(id), Some(state)) = (event.command_id(), ended) {
            self.commands.finish(id, state);
        }
        self.bus.publish(event);
    }

    fn finish_active(&mut self, outcome: Result<Result<(), KernelError>, JoinError>) {
        let Some(active) = self.active.take() else {
            return;
        };
        let id = active.command.id();

        let (state, failure) = match outcome {
            Ok(Ok(())) => (CommandState::Completed, None),
            Ok(Err(KernelError::Cancelled)) => (CommandState::Cancelled, None),
            Ok(Err(e @ KernelError::KernelNotFound(_))) => {
                (CommandState::Failed, Some((ErrorKind::KernelNotFound, e.to_string())))
            }
            Ok(Err(KernelError::Execution(message))) => {
                (CommandState::Failed, Some((ErrorKind::ExecutionFault, message)))
            }
            Err(e) => {
                warn!(command_id = %id, error = %e, "kernel task did not finish cleanly");
                let message = format!("kernel panicked: {e}");
                (CommandState::Failed, Some((ErrorKind::ExecutionFault, message)))
            }
        };

        let terminal = match failure {
            Some((kind, message)) => {
                self.publish_error(id, kind, message.clone());
                EventBody::CommandFailed(CommandFailed { message })
            }
            None if state == CommandState::Cancelled => EventBody::CommandCancelled,
            None => EventBody::CommandCompleted,
        };
        self.publish(KernelEvent::caused_by(id, terminal));

        for deferred in active.deferred {
            match deferred {
                Deferred::Event(event) => self.publish(event),
                Deferred::CancelAck(cancel_id) => {
                    if state != CommandState::Cancelled {
                        self.publish(KernelEvent::caused_by(
                            &cancel_id,
                            EventBody::CancellationIgnored(CancellationIgnored {
                                target_command_id: Some(id.clone()),
                            }),
                        ));
                    }
                    self.publish(KernelEvent::caused_by(&cancel_id, EventBody::CommandCompleted));
                }
            }
        }

        self.start_next();
    }

    fn publish_error(&self, id: &CommandId, kind: ErrorKind, message: String) {
        self.bus.publish(KernelEvent::caused_by(
            id,
            EventBody::ErrorProduced(ErrorProduced { kind, message }),
        ));
    }
}

fn cancellation_ignored(cancel: &KernelCommand, target: Option<&CommandId>) -> KernelEvent {
    KernelEvent::caused_by(
        cancel.id(),
        EventBody::CancellationIgnored(CancellationIgnored {
            target_command_id: target.cloned(),
        }),
    )
}
