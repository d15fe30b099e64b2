use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use serde::{Deserialize, Serialize};
use weave_formatting::FormattedValue;

use crate::{error::InvalidArgument, CommandId, KernelCommand};

/// A notification published on a session's event bus.
///
/// Every event caused by a command carries that command's id. Only
/// process-level events (see [`EventBody::requires_command`]) may omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command_id: Option<CommandId>,
    #[serde(flatten)]
    body: EventBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventBody {
    KernelReady,
    CodeSubmissionReceived(CodeSubmissionReceived),
    StandardOutputProduced(StandardOutputProduced),
    ValueProduced(ValueProduced),
    InputRequested(InputRequested),
    ErrorProduced(ErrorProduced),
    CancellationIgnored(CancellationIgnored),
    CommandCompleted,
    CommandFailed(CommandFailed),
    CommandCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSubmissionReceived {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardOutputProduced {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueProduced {
    pub formatted_values: Vec<FormattedValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    KernelNotFound,
    ExecutionFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorProduced {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationIgnored {
    /// `None` when the cancel named no target and nothing was in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_command_id: Option<CommandId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailed {
    pub message: String,
}

/// Kernel asks the front-end for a value mid-execution.
///
/// `input` stays empty until the session matches a reply to the command that
/// raised the request, and is written at most once. Clones share the same
/// cell, so every subscriber holding the event observes the resolution. The
/// value is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequested {
    pub prompt: String,
    pub password: bool,
    #[serde(skip)]
    input: InputCell,
}

#[derive(Debug, Clone, Default)]
struct InputCell(Arc<OnceLock<String>>);

impl PartialEq for InputCell {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Eq for InputCell {}

impl InputRequested {
    pub fn new(prompt: impl Into<String>, password: bool) -> Self {
        Self {
            prompt: prompt.into(),
            password,
            input: InputCell::default(),
        }
    }

    pub fn input(&self) -> Option<&str> {
        self.input.0.get().map(String::as_str)
    }

    /// Writes the reply value. Fails with the rejected value when the
    /// request was already resolved.
    pub(crate) fn resolve(&self, value: String) -> Result<(), String> {
        self.input.0.set(value)
    }
}

impl KernelEvent {
    /// Builds an event caused by `command`.
    ///
    /// Fails when the command is missing for a variant that reacts to user
    /// action.
    pub fn new(body: EventBody, command: Option<&KernelCommand>) -> Result<Self, InvalidArgument> {
        match command {
            Some(command) => Ok(Self {
                command_id: Some(command.id().clone()),
                body,
            }),
            None if body.requires_command() => {
                Err(InvalidArgument::new("command", "must not be null"))
            }
            None => Ok(Self {
                command_id: None,
                body,
            }),
        }
    }

    pub fn input_requested(
        prompt: impl Into<String>,
        password: bool,
        command: Option<&KernelCommand>,
    ) -> Result<Self, InvalidArgument> {
        Self::new(
            EventBody::InputRequested(InputRequested::new(prompt, password)),
            command,
        )
    }

    /// Correlates by id only, as when an event is rebuilt from a wire payload.
    pub fn from_parts(command_id: Option<CommandId>, body: EventBody) -> Self {
        Self { command_id, body }
    }

    pub(crate) fn caused_by(command_id: &CommandId, body: EventBody) -> Self {
        Self::from_parts(Some(command_id.clone()), body)
    }

    pub fn command_id(&self) -> Option<&CommandId> {
        self.command_id.as_ref()
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn is_terminal(&self) -> bool {
        self.body.is_terminal()
    }
}

impl EventBody {
    pub fn name(&self) -> &'static str {
        match self {
            Self::KernelReady => "KernelReady",
            Self::CodeSubmissionReceived(_) => "CodeSubmissionReceived",
            Self::StandardOutputProduced(_) => "StandardOutputProduced",
            Self::ValueProduced(_) => "ValueProduced",
            Self::InputRequested(_) => "InputRequested",
            Self::ErrorProduced(_) => "ErrorProduced",
            Self::CancellationIgnored(_) => "CancellationIgnored",
            Self::CommandCompleted => "CommandCompleted",
            Self::CommandFailed(_) => "CommandFailed",
            Self::CommandCancelled => "CommandCancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CommandCompleted | Self::CommandFailed(_) | Self::CommandCancelled
        )
    }

    pub fn requires_command(&self) -> bool {
        !matches!(self, Self::KernelReady)
    }
}

impl fmt::Display for InputRequested {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InputRequested: prompt='{}' password='{}'",
            self.prompt, self.password
        )
    }
}

impl fmt::Display for EventBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputRequested(request) => fmt::Display::fmt(request, f),
            Self::CodeSubmissionReceived(received) => {
                write!(f, "{}: code='{}'", self.name(), received.code)
            }
            Self::StandardOutputProduced(output) => {
                write!(f, "{}: text='{}'", self.name(), output.text)
            }
            Self::ValueProduced(produced) => {
                f.write_str(self.name())?;
                let mut separator = ":";
                for formatted in &produced.formatted_values {
                    write!(f, "{separator} {}='{}'", formatted.mime_type, formatted.value)?;
                    separator = "";
                }
                Ok(())
            }
            Self::ErrorProduced(error) => write!(
                f,
                "{}: kind='{:?}' message='{}'",
                self.name(),
                error.kind,
                error.message
            ),
            Self::CancellationIgnored(ignored) => match &ignored.target_command_id {
                Some(target) => write!(f, "{}: targetCommandId='{target}'", self.name()),
                None => f.write_str(self.name()),
            },
            Self::CommandFailed(failed) => {
                write!(f, "{}: message='{}'", self.name(), failed.message)
            }
            Self::KernelReady | Self::CommandCompleted | Self::CommandCancelled => {
                f.write_str(self.name())
            }
        }
    }
}

impl fmt::Display for KernelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.body, f)?;
        if let Some(command_id) = &self.command_id {
            write!(f, " commandId='{command_id}'")?;
        }
        Ok(())
    }
}
