//! JSON payloads exchanged with a hosting transport.
//!
//! One inbound message is one command. Outbound messages are events, plus a
//! `CommandRejected` answer for each inbound message the session refused.
//! Decoded events carry only the causing command's id. The resolved value of
//! an `InputRequested` event never leaves the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CommandId, InvalidArgument, KernelCommand, KernelEvent};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
}

/// Sent back instead of events when an inbound message never became a
/// submission: it did not decode, or the session turned it away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "CommandRejected", rename_all = "camelCase")]
pub struct CommandRejected {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    pub message: String,
}

pub fn decode_command(payload: &str) -> Result<KernelCommand, WireError> {
    let command: KernelCommand = serde_json::from_str(payload)?;
    command.validate()?;
    Ok(command)
}

pub fn encode_command(command: &KernelCommand) -> Result<String, WireError> {
    Ok(serde_json::to_string(command)?)
}

pub fn encode_event(event: &KernelEvent) -> Result<String, WireError> {
    Ok(serde_json::to_string(event)?)
}

pub fn encode_rejection(rejection: &CommandRejected) -> Result<String, WireError> {
    Ok(serde_json::to_string(rejection)?)
}

/// The `id` of a payload that failed to decode, when it has a readable one.
pub fn command_id_of(payload: &str) -> Option<CommandId> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value.get("id")?.as_str().map(CommandId::from)
}

pub fn decode_event(payload: &str) -> Result<KernelEvent, WireError> {
    let event: KernelEvent = serde_json::from_str(payload)?;
    if event.command_id().is_none() && event.body().requires_command() {
        return Err(InvalidArgument {
            argument: "commandId",
            reason: "required for events caused by a command",
        }
        .into());
    }
    Ok(event)
}
