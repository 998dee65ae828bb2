//! Domain error types for the PostgreSQL resource agent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for agent operations that may return an [`AgentError`].
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Result alias for external command invocations.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Result alias for privilege-separated operations.
pub type PrivilegeResult<T> = std::result::Result<T, PrivilegeError>;

/// Result alias for configuration parsing.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level error surfaced by controller actions.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The cluster-control binary (or another helper) failed.
    #[error("external command failed")]
    Command(#[from] CommandError),
    /// Running an operation as the database user failed.
    #[error("privileged operation failed")]
    Privilege(#[from] PrivilegeError),
    /// The environment carried an unusable configuration value.
    #[error("configuration invalid")]
    Config(#[from] ConfigError),
}

impl AgentError {
    /// Reports whether the failure is a privileged child that died without a
    /// result.
    #[must_use]
    pub const fn is_child_crash(&self) -> bool {
        matches!(self, Self::Privilege(PrivilegeError::ChildCrashed { .. }))
    }
}

/// Failures raised while running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be launched at all.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Rendered command line.
        command: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The combined output buffer could not be prepared or read back.
    #[error("failed to capture output of `{command}`: {source}")]
    Capture {
        /// Rendered command line.
        command: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The command ran and exited with a non-zero status.
    #[error("`{command}` exited with status {exit_code}: {output}")]
    Failed {
        /// Rendered command line.
        command: String,
        /// Exit status reported by the child.
        exit_code: i32,
        /// Merged stdout and stderr, truncated for readability.
        output: String,
    },
    /// The command was terminated by a signal before exiting.
    #[error("`{command}` was terminated by a signal: {output}")]
    Terminated {
        /// Rendered command line.
        command: String,
        /// Merged stdout and stderr, truncated for readability.
        output: String,
    },
}

/// Failures raised by an operation while it runs under the database user.
///
/// The type crosses the pipe between the privileged child and its parent, so
/// it carries strings rather than live error values.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum OperationFailure {
    /// A configuration or marker file could not be written.
    #[error("failed to write {path}: {message}")]
    ConfigWrite {
        /// File that could not be written.
        path: String,
        /// Description of the I/O failure.
        message: String,
    },
    /// The server accepted the connection but the status query failed.
    #[error("recovery state query failed: {message}")]
    Query {
        /// Description of the query failure.
        message: String,
    },
}

/// Failures of the privilege-separation channel itself.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The target account is unknown to the user database.
    #[error("failed to resolve user '{user}': {reason}")]
    UserLookupFailed {
        /// Requested account name.
        user: String,
        /// Why the lookup failed.
        reason: String,
    },
    /// The child could not assume the target identity.
    #[error("failed to switch identity to '{user}': {message}")]
    IdentitySwitch {
        /// Requested account name.
        user: String,
        /// Description of the failing system call.
        message: String,
    },
    /// The result pipe could not be created or read.
    #[error("privilege channel failed: {0}")]
    Channel(#[source] std::io::Error),
    /// The child process could not be created.
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    /// The child process could not be reaped.
    #[error("waiting for privileged child failed: {0}")]
    Wait(#[source] nix::Error),
    /// The child exited without producing a result.
    #[error("privileged child crashed: {detail}")]
    ChildCrashed {
        /// Exit status or signal observed when reaping the child.
        detail: String,
    },
    /// The operation ran and reported its own failure.
    #[error(transparent)]
    Operation(#[from] OperationFailure),
}

/// Failures while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("{key}='{value}' is invalid: {reason}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// Raw value supplied.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// A variable was present but not valid UTF-8.
    #[error("{key} must contain a valid UTF-8 value")]
    NotUnicode {
        /// Environment variable name.
        key: String,
    },
}

/// Failures while interpreting the agent's command line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// No action argument was supplied.
    #[error("missing action argument")]
    MissingAction,
    /// More than one positional argument was supplied.
    #[error("unexpected extra argument: {0}")]
    UnexpectedArgument(String),
    /// The action argument was not valid UTF-8.
    #[error("action argument must be valid UTF-8")]
    NonUnicode,
    /// The action is not one the agent implements.
    #[error("unknown action '{0}'")]
    UnknownAction(String),
}
