//! Determines whether the local PostgreSQL instance is stopped, a standby,
//! or the primary.
//!
//! The check is two-tier. A missing pid marker means the server is not
//! running and the probe returns without touching the database, which keeps
//! frequent monitor calls cheap. Otherwise the probe asks the server through
//! a privilege-separated connection whether it is in recovery.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use postgres::{Config, NoTls};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::InstanceConfig;
use crate::error::{AgentResult, OperationFailure};
use crate::observability::LOG_TARGET;
use crate::privileges::{Executor, Operation};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECOVERY_QUERY: &str = "SELECT pg_is_in_recovery()";

/// Replication role of the local instance, derived on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Not running, or not accepting connections.
    Stopped,
    /// Running and replaying WAL from a primary.
    Standby,
    /// Running and accepting writes.
    Primary,
}

impl Role {
    /// Reports whether the server is up in either role.
    #[must_use]
    pub const fn is_running(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Standby => "standby",
            Self::Primary => "primary",
        })
    }
}

/// Source of the instance's current role.
pub trait RoleProbe {
    /// Reports whether the server's pid marker exists.
    fn pid_file_present(&self) -> bool;

    /// Determines the current role.
    ///
    /// # Errors
    ///
    /// Returns an error when the privileged query could not be carried out,
    /// including when the privileged child crashed. Refused connections are
    /// not errors; they resolve to [`Role::Stopped`].
    fn current_role(&self) -> AgentResult<Role>;
}

impl<P: RoleProbe + ?Sized> RoleProbe for &P {
    fn pid_file_present(&self) -> bool {
        (**self).pid_file_present()
    }

    fn current_role(&self) -> AgentResult<Role> {
        (**self).current_role()
    }
}

/// Probes the real server through the configured executor.
#[derive(Debug)]
pub struct PostgresRoleProbe<'a, X> {
    config: &'a InstanceConfig,
    executor: X,
}

impl<'a, X: Executor> PostgresRoleProbe<'a, X> {
    /// Creates a probe for the configured instance.
    pub const fn new(config: &'a InstanceConfig, executor: X) -> Self {
        Self { config, executor }
    }
}

impl<X: Executor> RoleProbe for PostgresRoleProbe<'_, X> {
    fn pid_file_present(&self) -> bool {
        self.config.pid_file().exists()
    }

    fn current_role(&self) -> AgentResult<Role> {
        if !self.pid_file_present() {
            debug!(
                target: LOG_TARGET,
                pid_file = %self.config.pid_file(),
                "pid marker absent; instance is stopped"
            );
            return Ok(Role::Stopped);
        }

        let query = RecoveryStateQuery::for_instance(self.config);
        let role = match self.executor.run_as(&self.config.user, &query)? {
            RecoveryState::InRecovery => Role::Standby,
            RecoveryState::Writable => Role::Primary,
            RecoveryState::Unreachable(reason) => {
                debug!(target: LOG_TARGET, %reason, "server unreachable; treating as stopped");
                Role::Stopped
            }
        };
        debug!(target: LOG_TARGET, %role, "probed instance role");
        Ok(role)
    }
}

/// Server answer to the recovery-state query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryState {
    /// `pg_is_in_recovery()` returned true.
    InRecovery,
    /// `pg_is_in_recovery()` returned false.
    Writable,
    /// The connection could not be established.
    Unreachable(String),
}

/// Connects over the local socket and asks whether the server is in recovery.
#[derive(Debug, Clone)]
pub struct RecoveryStateQuery {
    socket_dir: Utf8PathBuf,
    port: u16,
    database: String,
    user: String,
}

impl RecoveryStateQuery {
    /// Targets the configured instance's Unix socket.
    #[must_use]
    pub fn for_instance(config: &InstanceConfig) -> Self {
        Self {
            socket_dir: config.run_dir.clone(),
            port: config.port,
            database: config.database.clone(),
            user: config.user.clone(),
        }
    }
}

impl Operation for RecoveryStateQuery {
    type Output = RecoveryState;

    fn name(&self) -> &'static str {
        "query_recovery_state"
    }

    fn execute(&self) -> Result<RecoveryState, OperationFailure> {
        let mut config = Config::new();
        config
            .host_path(self.socket_dir.as_std_path())
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .connect_timeout(CONNECT_TIMEOUT);

        let mut client = match config.connect(NoTls) {
            Ok(client) => client,
            Err(err) => return Ok(RecoveryState::Unreachable(err.to_string())),
        };
        let row = client
            .query_one(RECOVERY_QUERY, &[])
            .map_err(|err| OperationFailure::Query {
                message: err.to_string(),
            })?;
        let in_recovery: bool = row.try_get(0).map_err(|err| OperationFailure::Query {
            message: err.to_string(),
        })?;
        Ok(if in_recovery {
            RecoveryState::InRecovery
        } else {
            RecoveryState::Writable
        })
    }
}
