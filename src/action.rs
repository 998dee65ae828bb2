//! Closed set of OCF actions the agent answers to.

use std::fmt;
use std::str::FromStr;

use crate::error::InvocationError;

/// One verb issued by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Start the instance as a standby.
    Start,
    /// Stop the instance with a fast shutdown.
    Stop,
    /// Report the instance's running state and role.
    Monitor,
    /// Turn a standby into the primary.
    Promote,
    /// Turn the primary back into a standby.
    Demote,
    /// Receive a pre/post notification about a peer's action.
    Notify,
    /// Print a human-readable up/down line.
    Status,
    /// Print the agent descriptor.
    MetaData,
    /// List the supported actions.
    Methods,
}

impl Action {
    /// Every supported action, in the order `methods` lists them.
    pub const ALL: [Self; 9] = [
        Self::Start,
        Self::Stop,
        Self::Status,
        Self::Monitor,
        Self::MetaData,
        Self::Promote,
        Self::Demote,
        Self::Notify,
        Self::Methods,
    ];

    /// Returns the verb as the cluster manager spells it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Monitor => "monitor",
            Self::Promote => "promote",
            Self::Demote => "demote",
            Self::Notify => "notify",
            Self::Status => "status",
            Self::MetaData => "meta-data",
            Self::Methods => "methods",
        }
    }

    /// Reports whether the action only describes the agent.
    #[must_use]
    pub const fn is_descriptive(self) -> bool {
        matches!(self, Self::MetaData | Self::Methods)
    }

    /// Reports whether the action must succeed even when the instance
    /// configuration is unusable.
    ///
    /// Descriptor actions need no instance at all. `notify` never fails and
    /// `status` only reports, so both fall back to the default configuration
    /// instead of answering `OCF_ERR_CONFIGURED`.
    #[must_use]
    pub const fn tolerates_invalid_config(self) -> bool {
        self.is_descriptive() || matches!(self, Self::Notify | Self::Status)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = InvocationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == raw)
            .ok_or_else(|| InvocationError::UnknownAction(raw.to_owned()))
    }
}
