use serde::Deserialize;

/// What happens to a `SubmitCode` that arrives while another command is in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait in FIFO order, up to `queue_capacity` commands.
    #[default]
    Queue,
    /// Reject immediately with `SubmitError::SessionBusy`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub queue_capacity: usize,
    pub busy_policy: BusyPolicy,
    /// Events retained for subscribers that ask for replay. Zero disables
    /// replay.
    pub replay_capacity: usize,
    /// Mime types every produced value is rendered into.
    pub mime_types: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            busy_policy: BusyPolicy::Queue,
            replay_capacity: 256,
            mime_types: vec![weave_formatting::PLAIN_TEXT.to_string()],
        }
    }
}
