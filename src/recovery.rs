//! Writes the standby descriptor and the promotion trigger.
//!
//! Both files live in the data directory and are owned by the database user,
//! so every write goes through the privilege-separated executor.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::config::InstanceConfig;
use crate::error::{AgentResult, OperationFailure};
use crate::fs::{remove_file_if_exists, replace_file, touch_file};
use crate::observability::LOG_TARGET;
use crate::privileges::{Executor, Operation};

/// On-disk standby descriptor (`recovery.conf`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Connection string used to stream from the primary.
    pub primary_conninfo: String,
    /// Marker whose creation ends recovery.
    pub trigger_file: Utf8PathBuf,
    /// Optional archive restore command.
    pub restore_command: Option<String>,
}

impl RecoveryConfig {
    /// Builds the descriptor for the configured instance.
    #[must_use]
    pub fn for_instance(config: &InstanceConfig) -> Self {
        Self {
            primary_conninfo: config.primary_conninfo.clone(),
            trigger_file: config.trigger_file(),
            restore_command: config.restore_command.clone(),
        }
    }

    /// Renders the file contents. The recovery target is always the latest
    /// timeline so a standby follows a newly promoted primary.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "standby_mode = 'on'\n\
             primary_conninfo = '{}'\n\
             recovery_target_timeline = 'latest'\n\
             trigger_file = '{}'\n",
            quote(&self.primary_conninfo),
            quote(self.trigger_file.as_str()),
        );
        if let Some(command) = self.restore_command.as_deref() {
            out.push_str(&format!("restore_command = '{}'\n", quote(command)));
        }
        out
    }
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

/// Writes standby and promotion markers as the database user.
#[derive(Debug)]
pub struct RecoveryConfigurator<'a, X> {
    config: &'a InstanceConfig,
    executor: X,
}

impl<'a, X: Executor> RecoveryConfigurator<'a, X> {
    /// Creates a configurator for the configured instance.
    pub const fn new(config: &'a InstanceConfig, executor: X) -> Self {
        Self { config, executor }
    }

    /// Replaces the standby descriptor and clears any stale trigger.
    ///
    /// # Errors
    ///
    /// Returns an error wrapping [`OperationFailure::ConfigWrite`] when the
    /// descriptor cannot be written; the caller must abort its action.
    pub fn write_standby_config(&self) -> AgentResult<()> {
        let descriptor = RecoveryConfig::for_instance(self.config);
        let operation = WriteStandbyConfig {
            path: self.config.recovery_file(),
            contents: descriptor.render(),
            trigger_file: descriptor.trigger_file,
        };
        info!(
            target: LOG_TARGET,
            path = %operation.path,
            "writing standby configuration"
        );
        self.executor.run_as(&self.config.user, &operation)?;
        Ok(())
    }

    /// Creates the trigger marker that asks the standby to promote.
    ///
    /// # Errors
    ///
    /// Returns an error wrapping [`OperationFailure::ConfigWrite`] when the
    /// marker cannot be created.
    pub fn drop_trigger(&self) -> AgentResult<()> {
        let operation = CreateTrigger {
            path: self.config.trigger_file(),
        };
        info!(target: LOG_TARGET, path = %operation.path, "dropping promotion trigger");
        self.executor.run_as(&self.config.user, &operation)?;
        Ok(())
    }
}

fn write_failure(path: &Utf8Path, err: &std::io::Error) -> OperationFailure {
    OperationFailure::ConfigWrite {
        path: path.to_string(),
        message: err.to_string(),
    }
}

/// Replaces `recovery.conf` and removes a leftover trigger.
#[derive(Debug, Clone)]
pub struct WriteStandbyConfig {
    path: Utf8PathBuf,
    contents: String,
    trigger_file: Utf8PathBuf,
}

impl Operation for WriteStandbyConfig {
    type Output = ();

    fn name(&self) -> &'static str {
        "write_standby_config"
    }

    fn execute(&self) -> Result<(), OperationFailure> {
        // A trigger left by an earlier promotion would promote the standby
        // again as soon as it starts.
        remove_file_if_exists(&self.trigger_file)
            .map_err(|err| write_failure(&self.trigger_file, &err))?;
        replace_file(&self.path, &self.contents).map_err(|err| write_failure(&self.path, &err))
    }
}

/// Creates the promotion trigger marker.
#[derive(Debug, Clone)]
pub struct CreateTrigger {
    path: Utf8PathBuf,
}

impl Operation for CreateTrigger {
    type Output = ();

    fn name(&self) -> &'static str {
        "create_trigger"
    }

    fn execute(&self) -> Result<(), OperationFailure> {
        touch_file(&self.path).map_err(|err| write_failure(&self.path, &err))
    }
}
