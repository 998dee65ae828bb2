//! OCF action state machine for one PostgreSQL instance.
//!
//! Every action observes the instance through a [`RoleProbe`], changes it
//! through the cluster-control binary and the [`RecoveryConfigurator`], and
//! reports an [`OcfExitCode`]. Nothing is remembered between invocations; the
//! filesystem and the running server are the only state.

use std::io::Write;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{CommandLine, CommandRunner};
use crate::config::{InstanceConfig, NotifyContext};
use crate::error::AgentError;
use crate::exit::OcfExitCode;
use crate::observability::LOG_TARGET;
use crate::privileges::Executor;
use crate::recovery::RecoveryConfigurator;
use crate::role::{Role, RoleProbe};

/// Delay between role probes while waiting for a promotion to finish.
pub const PROMOTE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one PostgreSQL instance through the OCF actions.
#[derive(Debug)]
pub struct ClusterController<'cfg, P, X, C> {
    config: &'cfg InstanceConfig,
    probe: P,
    executor: X,
    runner: C,
    poll_interval: Duration,
}

impl<'cfg, P, X, C> ClusterController<'cfg, P, X, C>
where
    P: RoleProbe,
    X: Executor,
    C: CommandRunner,
{
    /// Wires a controller for the configured instance.
    pub const fn new(config: &'cfg InstanceConfig, probe: P, executor: X, runner: C) -> Self {
        Self {
            config,
            probe,
            executor,
            runner,
            poll_interval: PROMOTE_POLL_INTERVAL,
        }
    }

    /// Overrides the delay between probes while promoting.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Starts the instance as a standby unless it already runs.
    pub fn start(&self) -> OcfExitCode {
        match self.probe.current_role() {
            Ok(Role::Stopped) => {}
            Ok(role) => {
                info!(target: LOG_TARGET, %role, "instance already running; nothing to start");
                return OcfExitCode::Success;
            }
            Err(err) => return self.fail("start", &err),
        }

        if let Err(err) = self.recovery().write_standby_config() {
            return self.fail("start", &err);
        }
        match self.ctl("start", &["-w"]) {
            Ok(()) => OcfExitCode::Success,
            Err(err) => self.fail("start", &err),
        }
    }

    /// Stops the instance with a fast shutdown.
    pub fn stop(&self) -> OcfExitCode {
        match self.probe.current_role() {
            Ok(Role::Stopped) => {
                info!(target: LOG_TARGET, "instance already stopped");
                return OcfExitCode::Success;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    error = %error_chain(&err),
                    "could not determine role before stopping; stopping anyway"
                );
            }
        }
        match self.ctl("stop", &["-m", "fast"]) {
            Ok(()) => OcfExitCode::Success,
            Err(err) => self.fail("stop", &err),
        }
    }

    /// Reports whether the instance runs and in which role.
    ///
    /// A primary answers [`OcfExitCode::RunningMaster`], a standby
    /// [`OcfExitCode::Success`]. A stopped instance whose data directory is
    /// missing answers [`OcfExitCode::NotInstalled`]. A privileged child that
    /// crashed while probing counts as not running.
    pub fn monitor(&self) -> OcfExitCode {
        if !self.probe.pid_file_present() {
            return self.stopped_code();
        }
        match self.probe.current_role() {
            Ok(Role::Primary) => OcfExitCode::RunningMaster,
            Ok(Role::Standby) => OcfExitCode::Success,
            Ok(Role::Stopped) => self.stopped_code(),
            Err(err) if err.is_child_crash() => {
                warn!(
                    target: LOG_TARGET,
                    error = %error_chain(&err),
                    "role probe crashed; reporting instance as not running"
                );
                OcfExitCode::NotRunning
            }
            Err(err) => self.fail("monitor", &err),
        }
    }

    /// Promotes a standby and waits until it accepts writes.
    ///
    /// The wait has no internal limit. The cluster manager bounds it with
    /// the promote action timeout and kills the agent when it expires.
    pub fn promote(&self) -> OcfExitCode {
        match self.probe.current_role() {
            Ok(Role::Stopped) => {
                warn!(target: LOG_TARGET, "cannot promote a stopped instance");
                return OcfExitCode::NotRunning;
            }
            Ok(Role::Primary) => {
                info!(target: LOG_TARGET, "instance is already primary");
                return OcfExitCode::Success;
            }
            Ok(Role::Standby) => {}
            Err(err) => return self.fail("promote", &err),
        }

        if let Err(err) = self.recovery().drop_trigger() {
            return self.fail("promote", &err);
        }

        loop {
            thread::sleep(self.poll_interval);
            match self.probe.current_role() {
                Ok(Role::Primary) => {
                    info!(target: LOG_TARGET, "promotion complete");
                    return OcfExitCode::Success;
                }
                Ok(Role::Stopped) => {
                    warn!(target: LOG_TARGET, "instance stopped while promoting");
                    return OcfExitCode::NotRunning;
                }
                Ok(Role::Standby) => {
                    debug!(target: LOG_TARGET, "still in recovery; waiting");
                }
                Err(err) => return self.fail("promote", &err),
            }
        }
    }

    /// Restarts the instance as a standby of the configured primary.
    pub fn demote(&self) -> OcfExitCode {
        if let Err(err) = self.recovery().write_standby_config() {
            return self.fail("demote", &err);
        }
        // The restart outcome is judged by the probe below, not by the
        // cluster-control exit status.
        if let Err(err) = self.ctl("stop", &["-m", "fast"]) {
            warn!(target: LOG_TARGET, error = %error_chain(&err), "stop during demote failed");
        }
        if let Err(err) = self.ctl("start", &["-w"]) {
            warn!(target: LOG_TARGET, error = %error_chain(&err), "start during demote failed");
        }

        match self.probe.current_role() {
            Ok(role) if role.is_running() => {
                info!(target: LOG_TARGET, %role, "demotion complete");
                OcfExitCode::Success
            }
            Ok(_) => {
                warn!(target: LOG_TARGET, "instance is not running after demote");
                OcfExitCode::NotRunning
            }
            Err(err) => self.fail("demote", &err),
        }
    }

    /// Logs a peer notification. Never fails.
    pub fn notify(&self, context: &NotifyContext) -> OcfExitCode {
        let kind = context.kind.as_deref().unwrap_or("unknown");
        let operation = context.operation.as_deref().unwrap_or("unknown");
        let master = context.master_uname.as_deref().unwrap_or("");
        let resource = self.config.resource_instance.as_str();
        match operation {
            "promote" => info!(
                target: LOG_TARGET,
                resource,
                kind,
                master,
                promote = context.promote_uname.as_deref().unwrap_or(""),
                "promote notification"
            ),
            "demote" => info!(
                target: LOG_TARGET,
                resource,
                kind,
                master,
                demote = context.demote_uname.as_deref().unwrap_or(""),
                "demote notification"
            ),
            _ => info!(
                target: LOG_TARGET,
                resource,
                kind,
                operation,
                "notification received"
            ),
        }
        OcfExitCode::Success
    }

    /// Writes a one-line up/down report to `out`.
    pub fn status(&self, out: &mut impl Write) -> OcfExitCode {
        let role = self.probe.current_role().unwrap_or_else(|err| {
            debug!(target: LOG_TARGET, error = %error_chain(&err), "role probe failed; reporting down");
            Role::Stopped
        });
        let resource = &self.config.resource_instance;
        let line = if role.is_running() {
            format!("{resource} is up ({role})")
        } else {
            format!("{resource} is down")
        };
        if let Err(err) = writeln!(out, "{line}") {
            warn!(target: LOG_TARGET, error = %err, "failed to write status line");
        }
        OcfExitCode::Success
    }

    const fn recovery(&self) -> RecoveryConfigurator<'cfg, &X> {
        RecoveryConfigurator::new(self.config, &self.executor)
    }

    fn stopped_code(&self) -> OcfExitCode {
        if self.config.data_dir.is_dir() {
            OcfExitCode::NotRunning
        } else {
            warn!(
                target: LOG_TARGET,
                data_dir = %self.config.data_dir,
                "data directory missing"
            );
            OcfExitCode::NotInstalled
        }
    }

    fn ctl(&self, verb: &str, options: &[&str]) -> Result<(), AgentError> {
        let command = CommandLine::new(&self.config.pgctlcluster)
            .arg(self.config.version.as_str())
            .arg(self.config.cluster_name.as_str())
            .arg(verb)
            .arg("--")
            .args(options.iter().copied());
        info!(target: LOG_TARGET, %command, "calling cluster control");
        let output = self.runner.run(&command)?;
        if !output.trim().is_empty() {
            debug!(target: LOG_TARGET, output = %output.trim_end(), "cluster control output");
        }
        Ok(())
    }

    fn fail(&self, action: &str, err: &AgentError) -> OcfExitCode {
        let detail = error_chain(err);
        warn!(
            target: LOG_TARGET,
            action,
            resource = %self.config.resource_instance,
            error = %detail,
            "action failed"
        );
        OcfExitCode::ErrGeneric
    }
}

fn error_chain(err: &AgentError) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests;
