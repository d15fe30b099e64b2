use thiserror::Error;

use crate::CommandId;

/// A contract violation caught while constructing or validating a value,
/// before anything reaches the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid argument `{argument}`: {reason}")]
pub struct InvalidArgument {
    pub argument: &'static str,
    pub reason: &'static str,
}

impl InvalidArgument {
    pub(crate) fn new(argument: &'static str, reason: &'static str) -> Self {
        Self { argument, reason }
    }
}

/// Synchronous rejection of a submission. Nothing in the session changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),
    #[error("session is busy running command {0}")]
    SessionBusy(CommandId),
    #[error("session has shut down")]
    SessionClosed,
}

/// Failure reported by a kernel while handling a command. The dispatcher
/// turns every variant into events; none of them ends the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("kernel not found: {0}")]
    KernelNotFound(String),
    #[error("{0}")]
    Execution(String),
    #[error("command was cancelled")]
    Cancelled,
}
