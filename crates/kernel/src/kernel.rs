use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task,
};
use tokio_util::sync::CancellationToken;
use weave_formatting::FormatterConfig;

use crate::{
    command::SubmitCode,
    event::{InputRequested, StandardOutputProduced, ValueProduced},
    CommandId, EventBody, EventBus, KernelCommand, KernelError, KernelEvent,
};

/// An execution unit. A kernel handles one submission at a time per session
/// and reports progress through the [`KernelContext`].
///
/// Returning `Ok` completes the command, `Err(KernelError::Cancelled)`
/// acknowledges a cancellation and any other error fails it. The session
/// publishes the matching terminal event.
#[async_trait]
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    async fn submit_code(
        &self,
        submission: &SubmitCode,
        context: &mut KernelContext,
    ) -> Result<(), KernelError>;
}

pub(crate) struct InputRequest {
    pub command_id: CommandId,
    pub request: InputRequested,
    pub responds_to: oneshot::Sender<String>,
}

/// Everything a kernel may touch while running one command.
///
/// Each `publish` is a yield point: cancellation is observed there, and the
/// event has reached every subscriber before the call returns.
pub struct KernelContext {
    command: Arc<KernelCommand>,
    bus: Arc<EventBus>,
    input_requests: mpsc::Sender<InputRequest>,
    cancellation: CancellationToken,
    formatting: FormatterConfig,
}

impl KernelContext {
    pub(crate) fn new(
        command: Arc<KernelCommand>,
        bus: Arc<EventBus>,
        input_requests: mpsc::Sender<InputRequest>,
        cancellation: CancellationToken,
        formatting: FormatterConfig,
    ) -> Self {
        Self {
            command,
            bus,
            input_requests,
            cancellation,
            formatting,
        }
    }

    pub fn command(&self) -> &KernelCommand {
        &self.command
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// For kernels that need to race a long operation against cancellation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn checkpoint(&self) -> Result<(), KernelError> {
        if self.is_cancelled() {
            Err(KernelError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn publish(&mut self, body: EventBody) -> Result<(), KernelError> {
        if body.is_terminal() || !body.requires_command() {
            return Err(KernelError::Execution(format!(
                "{} can only be published by the session",
                body.name()
            )));
        }
        if let EventBody::InputRequested(_) = body {
            return Err(KernelError::Execution(
                "input must be requested through request_input".to_string(),
            ));
        }
        self.checkpoint()?;

        self.bus
            .publish(KernelEvent::caused_by(self.command.id(), body));

        task::yield_now().await;
        Ok(())
    }

    pub async fn write_stdout(&mut self, text: impl Into<String>) -> Result<(), KernelError> {
        self.publish(EventBody::StandardOutputProduced(StandardOutputProduced {
            text: text.into(),
        }))
        .await
    }

    /// Renders `value` into every configured mime type and publishes the
    /// result as one `ValueProduced` event.
    pub async fn display_value(&mut self, value: &Value) -> Result<(), KernelError> {
        let formatted_values = self
            .formatting
            .format(value)
            .map_err(|e| KernelError::Execution(e.to_string()))?;

        self.publish(EventBody::ValueProduced(ValueProduced { formatted_values }))
            .await
    }

    /// Suspends this command until the front-end replies or the command is
    /// cancelled.
    pub async fn request_input(
        &mut self,
        prompt: impl Into<String>,
        password: bool,
    ) -> Result<String, KernelError> {
        self.checkpoint()?;

        let (responds_to, reply) = oneshot::channel();
        let request = InputRequest {
            command_id: self.command.id().clone(),
            request: InputRequested::new(prompt, password),
            responds_to,
        };

        self.input_requests
            .send(request)
            .await
            .map_err(|_| KernelError::Cancelled)?;

        tokio::select! {
            biased;

            _ = self.cancellation.cancelled() => Err(KernelError::Cancelled),
            value = reply => value.map_err(|_| KernelError::Cancelled),
        }
    }
}
