//! Manages a PostgreSQL instance as a multi-state cluster resource.
//!
//! The library implements an OCF resource agent: the cluster manager invokes
//! it with one action at a time and acts on the returned exit code. Database
//! access and writes into the data directory run in a forked child that has
//! switched to the PostgreSQL OS user, so the agent itself may run as root
//! without ever touching the cluster as root.

mod action;
mod agent;
mod command;
mod config;
mod controller;
mod error;
mod exit;
mod fs;
mod metadata;
mod observability;
mod privileges;
mod recovery;
mod role;
#[doc(hidden)]
pub mod test_support;

pub use action::Action;
pub use agent::{dispatch, invocation_exit_code, parse_action, run_from_env, usage};
pub use command::{CommandLine, CommandRunner, SystemCommandRunner};
pub use config::{InstanceConfig, NotifyContext};
pub use controller::{ClusterController, PROMOTE_POLL_INTERVAL};
pub use error::{
    AgentError, AgentResult, CommandError, CommandResult, ConfigError, ConfigResult,
    InvocationError, OperationFailure, PrivilegeError, PrivilegeResult,
};
pub use exit::OcfExitCode;
pub use metadata::{AGENT_NAME, AGENT_VERSION, render as render_metadata};
pub use observability::{LogHandle, LogSettings};
pub use privileges::{Account, Executor, ForkExecutor, Operation};
pub use recovery::{CreateTrigger, RecoveryConfig, RecoveryConfigurator, WriteStandbyConfig};
pub use role::{PostgresRoleProbe, RecoveryState, RecoveryStateQuery, Role, RoleProbe};
