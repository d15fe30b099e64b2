use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::InvalidArgument, CommandId};

/// A request addressed to a session.
///
/// Identity and addressing are fixed at construction. Once submitted, the
/// session shares the command behind an `Arc` and nothing mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelCommand {
    id: CommandId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_kernel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_command_id: Option<CommandId>,
    #[serde(flatten)]
    body: CommandBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandBody {
    SubmitCode(SubmitCode),
    /// Reply to an `InputRequested` event raised on behalf of the parent
    /// command.
    SendInput(SendInput),
    /// Cancels the parent command when one is named, otherwise the active
    /// command together with everything queued behind it.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCode {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendInput {
    pub value: String,
}

impl KernelCommand {
    pub fn new(body: CommandBody) -> Self {
        Self {
            id: CommandId::generate(),
            target_kernel_name: None,
            parent_command_id: None,
            body,
        }
    }

    pub fn submit_code(code: impl Into<String>) -> Self {
        Self::new(CommandBody::SubmitCode(SubmitCode { code: code.into() }))
    }

    pub fn send_input(parent: &CommandId, value: impl Into<String>) -> Self {
        Self::new(CommandBody::SendInput(SendInput {
            value: value.into(),
        }))
        .with_parent(parent)
    }

    pub fn cancel() -> Self {
        Self::new(CommandBody::Cancel)
    }

    pub fn cancel_command(target: &CommandId) -> Self {
        Self::cancel().with_parent(target)
    }

    pub fn with_id(mut self, id: impl Into<CommandId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_target_kernel(mut self, name: impl Into<String>) -> Self {
        self.target_kernel_name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent: &CommandId) -> Self {
        self.parent_command_id = Some(parent.clone());
        self
    }

    pub fn id(&self) -> &CommandId {
        &self.id
    }

    pub fn target_kernel_name(&self) -> Option<&str> {
        self.target_kernel_name.as_deref()
    }

    pub fn parent_command_id(&self) -> Option<&CommandId> {
        self.parent_command_id.as_ref()
    }

    pub fn body(&self) -> &CommandBody {
        &self.body
    }

    /// SendInput and Cancel act on whatever is already in flight instead of
    /// occupying the session themselves.
    pub fn is_control(&self) -> bool {
        !matches!(self.body, CommandBody::SubmitCode(_))
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.id.as_str().is_empty() {
            return Err(InvalidArgument::new("id", "must not be empty"));
        }
        if matches!(self.target_kernel_name.as_deref(), Some("")) {
            return Err(InvalidArgument::new(
                "targetKernelName",
                "must not be empty when present",
            ));
        }
        if matches!(self.body, CommandBody::SendInput(_)) && self.parent_command_id.is_none() {
            return Err(InvalidArgument::new(
                "parentCommandId",
                "a reply must name the command that requested input",
            ));
        }
        Ok(())
    }
}

impl CommandBody {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitCode(_) => "SubmitCode",
            Self::SendInput(_) => "SendInput",
            Self::Cancel => "Cancel",
        }
    }
}

impl fmt::Display for KernelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: id='{}'", self.body.name(), self.id)?;
        if let Some(target) = &self.target_kernel_name {
            write!(f, " targetKernelName='{target}'")?;
        }
        if let Some(parent) = &self.parent_command_id {
            write!(f, " parentCommandId='{parent}'")?;
        }
        match &self.body {
            CommandBody::SubmitCode(submit) => write!(f, " code='{}'", submit.code),
            CommandBody::SendInput(_) => Ok(()),
            CommandBody::Cancel => Ok(()),
        }
    }
}
