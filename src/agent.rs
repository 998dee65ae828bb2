//! Process entry for the resource agent.
//!
//! The cluster manager runs the agent with exactly one action argument and
//! reads the outcome from the exit code. This module parses that argument,
//! loads the instance configuration, wires the production collaborators, and
//! logs every action at entry and exit.

use std::ffi::OsString;
use std::io::{self, Write};

use tracing::{debug, error, info, warn};

use crate::action::Action;
use crate::command::{CommandRunner, SystemCommandRunner};
use crate::config::{InstanceConfig, NotifyContext};
use crate::controller::ClusterController;
use crate::error::InvocationError;
use crate::exit::OcfExitCode;
use crate::metadata;
use crate::observability::{LOG_TARGET, LogHandle, LogSettings};
use crate::privileges::{Executor, ForkExecutor};
use crate::role::{PostgresRoleProbe, RoleProbe};

/// Extracts the action from the process arguments, skipping the program
/// name.
///
/// # Errors
///
/// Returns [`InvocationError`] when the action is missing, not UTF-8,
/// unknown, or followed by further arguments.
pub fn parse_action<I>(args: I) -> Result<Action, InvocationError>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter().skip(1);
    let raw = args.next().ok_or(InvocationError::MissingAction)?;
    if let Some(extra) = args.next() {
        return Err(InvocationError::UnexpectedArgument(
            extra.to_string_lossy().into_owned(),
        ));
    }
    let verb = raw.into_string().map_err(|_| InvocationError::NonUnicode)?;
    verb.parse()
}

/// Maps an invocation error to the exit code the cluster manager expects.
pub const fn invocation_exit_code(err: &InvocationError) -> OcfExitCode {
    match err {
        InvocationError::UnknownAction(_) => OcfExitCode::ErrUnimplemented,
        InvocationError::MissingAction
        | InvocationError::UnexpectedArgument(_)
        | InvocationError::NonUnicode => OcfExitCode::ErrArgs,
    }
}

/// Renders the `usage` line listing every action.
#[must_use]
pub fn usage() -> String {
    let verbs: Vec<&str> = Action::ALL.iter().map(|action| action.as_str()).collect();
    format!("usage: {} {{{}}}", metadata::AGENT_NAME, verbs.join("|"))
}

/// Runs `action` against `controller`.
///
/// Descriptor output (`meta-data`, `methods`) goes to `out`; the `status`
/// line goes to `diag`.
pub fn dispatch<P, X, C>(
    action: Action,
    config: &InstanceConfig,
    controller: &ClusterController<'_, P, X, C>,
    out: &mut impl Write,
    diag: &mut impl Write,
) -> OcfExitCode
where
    P: RoleProbe,
    X: Executor,
    C: CommandRunner,
{
    match action {
        Action::Start => controller.start(),
        Action::Stop => controller.stop(),
        Action::Monitor => controller.monitor(),
        Action::Promote => controller.promote(),
        Action::Demote => controller.demote(),
        Action::Notify => controller.notify(&NotifyContext::from_env()),
        Action::Status => controller.status(diag),
        Action::MetaData => emit(out, &metadata::render(config)),
        Action::Methods => {
            let listing: String = Action::ALL
                .iter()
                .map(|verb| format!("{verb}\n"))
                .collect();
            emit(out, &listing)
        }
    }
}

fn emit(out: &mut impl Write, text: &str) -> OcfExitCode {
    match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        Ok(()) => OcfExitCode::Success,
        Err(err) => {
            error!(target: LOG_TARGET, error = %err, "failed to write descriptor output");
            OcfExitCode::ErrGeneric
        }
    }
}

/// Runs one agent invocation using the process environment and returns the
/// exit code for the cluster manager.
///
/// # Examples
/// ```no_run
/// use std::process::ExitCode;
///
/// fn main() -> ExitCode {
///     pg_ha_agent::run_from_env(std::env::args_os()).into()
/// }
/// ```
pub fn run_from_env<I>(args: I) -> OcfExitCode
where
    I: IntoIterator<Item = OsString>,
{
    let reporter = color_eyre::install();
    let log = LogHandle::open(&LogSettings::from_env());
    if let Err(err) = reporter {
        debug!(target: LOG_TARGET, "color_eyre already installed: {err}");
    }

    let code = run_action(args);
    log.close();
    code
}

fn run_action<I>(args: I) -> OcfExitCode
where
    I: IntoIterator<Item = OsString>,
{
    let action = match parse_action(args) {
        Ok(action) => action,
        Err(err) => {
            error!(target: LOG_TARGET, error = %err, "invalid invocation");
            report_usage(&mut io::stderr());
            return invocation_exit_code(&err);
        }
    };

    let config = match InstanceConfig::from_env() {
        Ok(config) => config,
        Err(err) if action.tolerates_invalid_config() => {
            warn!(target: LOG_TARGET, %action, error = %err, "configuration invalid; using defaults");
            InstanceConfig::default()
        }
        Err(err) => {
            error!(target: LOG_TARGET, %action, error = %err, "configuration invalid");
            return OcfExitCode::ErrConfigured;
        }
    };

    info!(
        target: LOG_TARGET,
        %action,
        resource = %config.resource_instance,
        host = %config.hostname,
        "action started"
    );

    let executor = ForkExecutor::new();
    let probe = PostgresRoleProbe::new(&config, executor);
    let controller = ClusterController::new(&config, probe, executor, SystemCommandRunner);
    let code = dispatch(
        action,
        &config,
        &controller,
        &mut io::stdout(),
        &mut io::stderr(),
    );

    info!(
        target: LOG_TARGET,
        %action,
        resource = %config.resource_instance,
        code = code.code(),
        result = code.as_str(),
        "action finished"
    );
    code
}

fn report_usage(diag: &mut impl Write) {
    if let Err(err) = writeln!(diag, "{}", usage()) {
        debug!(target: LOG_TARGET, error = %err, "failed to write usage");
    }
}
