//! Behavioural coverage for the OCF action state machine.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use color_eyre::eyre::{Result, ensure};
use rstest::rstest;

use super::*;
use crate::command::CommandLine;
use crate::error::{AgentResult, CommandError, CommandResult, PrivilegeError};
use crate::test_support::{InProcessExecutor, capture_info_logs, instance_config_in};

/// In-memory stand-in for the server and its cluster-control binary.
///
/// `start` brings the instance up as a standby and `stop` takes it down.
/// Roles queued in `scripted` are reported before the live state, which lets
/// a test describe how a promotion unfolds.
#[derive(Default)]
struct FakeCluster {
    role: Cell<Option<Role>>,
    scripted: RefCell<VecDeque<Role>>,
    crash_probe: Cell<bool>,
    failing_verb: Cell<Option<&'static str>>,
    probes: Cell<usize>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl FakeCluster {
    fn running(role: Role) -> Self {
        let cluster = Self::default();
        cluster.role.set(Some(role));
        cluster
    }

    fn live_role(&self) -> Role {
        self.role.get().unwrap_or(Role::Stopped)
    }

    fn verbs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|args| args.get(2).cloned())
            .collect()
    }
}

impl RoleProbe for FakeCluster {
    fn pid_file_present(&self) -> bool {
        self.live_role().is_running()
    }

    fn current_role(&self) -> AgentResult<Role> {
        self.probes.set(self.probes.get() + 1);
        if self.crash_probe.get() {
            return Err(PrivilegeError::ChildCrashed {
                detail: "killed by SIGKILL".to_owned(),
            }
            .into());
        }
        Ok(self
            .scripted
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.live_role()))
    }
}

impl CommandRunner for FakeCluster {
    fn run(&self, command: &CommandLine) -> CommandResult<String> {
        let args = command.arguments().to_vec();
        let verb = args.get(2).cloned().unwrap_or_default();
        self.calls.borrow_mut().push(args);
        if self.failing_verb.get() == Some(verb.as_str()) {
            return Err(CommandError::Failed {
                command: command.to_string(),
                exit_code: 1,
                output: "Error: could not start server".to_owned(),
            });
        }
        match verb.as_str() {
            "start" => self.role.set(Some(Role::Standby)),
            "stop" => self.role.set(None),
            _ => {}
        }
        Ok(String::new())
    }
}

type TestController<'a> =
    ClusterController<'a, &'a FakeCluster, InProcessExecutor, &'a FakeCluster>;

fn expect_code(actual: OcfExitCode, expected: OcfExitCode) -> Result<()> {
    ensure!(actual == expected, "expected {expected}, got {actual}");
    Ok(())
}

fn controller<'a>(config: &'a InstanceConfig, cluster: &'a FakeCluster) -> TestController<'a> {
    ClusterController::new(config, cluster, InProcessExecutor, cluster)
        .with_poll_interval(Duration::ZERO)
}

#[test]
fn monitor_before_start_reports_not_running() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    expect_code(controller(&config, &cluster).monitor(), OcfExitCode::NotRunning)?;
    Ok(())
}

#[test]
fn monitor_without_data_directory_is_not_installed_and_skips_probe() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut config = instance_config_in(root.path())?;
    config.data_dir = config.data_dir.join("missing");
    let cluster = FakeCluster::default();

    expect_code(controller(&config, &cluster).monitor(), OcfExitCode::NotInstalled)?;
    ensure!(cluster.probes.get() == 0, "database probe should not run");
    Ok(())
}

#[rstest]
#[case(Role::Standby, OcfExitCode::Success)]
#[case(Role::Primary, OcfExitCode::RunningMaster)]
fn monitor_maps_running_roles(#[case] role: Role, #[case] expected: OcfExitCode) -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(role);
    expect_code(controller(&config, &cluster).monitor(), expected)?;
    Ok(())
}

#[test]
fn monitor_with_crashed_probe_reports_not_running() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Primary);
    cluster.crash_probe.set(true);
    expect_code(controller(&config, &cluster).monitor(), OcfExitCode::NotRunning)?;
    Ok(())
}

#[test]
fn start_writes_standby_config_then_waits_for_server() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();

    expect_code(controller(&config, &cluster).start(), OcfExitCode::Success)?;

    let recovery = std::fs::read_to_string(config.recovery_file())?;
    ensure!(recovery.contains(&config.primary_conninfo), "conninfo missing");
    let calls = cluster.calls.borrow();
    ensure!(
        calls.as_slice() == [vec!["9.1", "main", "start", "--", "-w"]],
        "unexpected calls: {calls:?}"
    );
    Ok(())
}

#[test]
fn start_is_idempotent() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    let agent = controller(&config, &cluster);

    expect_code(agent.start(), OcfExitCode::Success)?;
    std::fs::write(config.recovery_file(), "left alone\n")?;
    expect_code(agent.start(), OcfExitCode::Success)?;

    ensure!(cluster.verbs() == ["start"], "second start must be a no-op");
    ensure!(
        std::fs::read_to_string(config.recovery_file())? == "left alone\n",
        "standby config rewritten while running"
    );
    Ok(())
}

#[test]
fn start_aborts_when_standby_config_cannot_be_written() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut config = instance_config_in(root.path())?;
    config.data_dir = config.data_dir.join("missing");
    let cluster = FakeCluster::default();

    expect_code(controller(&config, &cluster).start(), OcfExitCode::ErrGeneric)?;
    ensure!(cluster.calls.borrow().is_empty(), "server must not start");
    Ok(())
}

#[test]
fn start_reports_failed_cluster_control() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    cluster.failing_verb.set(Some("start"));
    expect_code(controller(&config, &cluster).start(), OcfExitCode::ErrGeneric)?;
    Ok(())
}

#[test]
fn stop_is_a_no_op_when_stopped() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    expect_code(controller(&config, &cluster).stop(), OcfExitCode::Success)?;
    ensure!(cluster.calls.borrow().is_empty(), "no cluster control calls expected");
    Ok(())
}

#[test]
fn stop_uses_fast_shutdown() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Primary);

    expect_code(controller(&config, &cluster).stop(), OcfExitCode::Success)?;
    let calls = cluster.calls.borrow();
    ensure!(
        calls.as_slice() == [vec!["9.1", "main", "stop", "--", "-m", "fast"]],
        "unexpected calls: {calls:?}"
    );
    Ok(())
}

#[test]
fn stop_proceeds_when_probe_crashes() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Standby);
    cluster.crash_probe.set(true);
    expect_code(controller(&config, &cluster).stop(), OcfExitCode::Success)?;
    ensure!(cluster.verbs() == ["stop"], "unexpected verbs");
    Ok(())
}

#[test]
fn stop_reports_failed_cluster_control() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Standby);
    cluster.failing_verb.set(Some("stop"));
    expect_code(controller(&config, &cluster).stop(), OcfExitCode::ErrGeneric)?;
    Ok(())
}

#[test]
fn promote_succeeds_once_primary_is_observed() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Standby);
    cluster
        .scripted
        .borrow_mut()
        .extend([Role::Standby, Role::Standby, Role::Primary]);

    expect_code(controller(&config, &cluster).promote(), OcfExitCode::Success)?;
    ensure!(config.trigger_file().exists(), "trigger must be written");
    ensure!(cluster.probes.get() == 3, "expected initial probe plus two polls");
    Ok(())
}

#[test]
fn promote_fails_when_server_dies() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Standby);
    cluster
        .scripted
        .borrow_mut()
        .extend([Role::Standby, Role::Standby, Role::Stopped]);
    expect_code(controller(&config, &cluster).promote(), OcfExitCode::NotRunning)?;
    Ok(())
}

#[test]
fn promote_of_stopped_instance_fails_without_trigger() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    expect_code(controller(&config, &cluster).promote(), OcfExitCode::NotRunning)?;
    ensure!(!config.trigger_file().exists(), "trigger must not be written");
    Ok(())
}

#[test]
fn promote_of_primary_is_a_no_op() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Primary);
    expect_code(controller(&config, &cluster).promote(), OcfExitCode::Success)?;
    ensure!(!config.trigger_file().exists(), "trigger must not be written");
    Ok(())
}

#[test]
fn promote_with_crashed_probe_is_a_hard_failure() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Standby);
    cluster.crash_probe.set(true);
    expect_code(controller(&config, &cluster).promote(), OcfExitCode::ErrGeneric)?;
    Ok(())
}

#[test]
fn demote_restarts_as_standby() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    std::fs::write(config.trigger_file(), "")?;
    let cluster = FakeCluster::running(Role::Primary);

    expect_code(controller(&config, &cluster).demote(), OcfExitCode::Success)?;
    ensure!(cluster.verbs() == ["stop", "start"], "unexpected verbs");
    ensure!(config.recovery_file().exists(), "standby config missing");
    ensure!(!config.trigger_file().exists(), "stale trigger survived");
    ensure!(cluster.current_role()? == Role::Standby, "expected a standby");
    Ok(())
}

#[test]
fn demote_aborts_when_standby_config_cannot_be_written() -> Result<()> {
    let root = tempfile::tempdir()?;
    let mut config = instance_config_in(root.path())?;
    config.data_dir = config.data_dir.join("missing");
    let cluster = FakeCluster::running(Role::Primary);

    expect_code(controller(&config, &cluster).demote(), OcfExitCode::ErrGeneric)?;
    ensure!(cluster.calls.borrow().is_empty(), "primary must keep running");
    ensure!(cluster.live_role() == Role::Primary, "role must be unchanged");
    Ok(())
}

#[test]
fn demote_fails_when_instance_stays_down() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::running(Role::Primary);
    cluster.failing_verb.set(Some("start"));
    expect_code(controller(&config, &cluster).demote(), OcfExitCode::NotRunning)?;
    Ok(())
}

#[rstest]
#[case(NotifyContext::default())]
#[case(NotifyContext {
    kind: Some("pre".to_owned()),
    operation: Some("promote".to_owned()),
    master_uname: Some("db1".to_owned()),
    promote_uname: Some("db2".to_owned()),
    demote_uname: None,
})]
#[case(NotifyContext {
    kind: Some("post".to_owned()),
    operation: Some("demote".to_owned()),
    master_uname: None,
    promote_uname: None,
    demote_uname: Some("db1".to_owned()),
})]
#[case(NotifyContext {
    kind: Some("post".to_owned()),
    operation: Some("start".to_owned()),
    ..NotifyContext::default()
})]
fn notify_never_fails(#[case] context: NotifyContext) -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    expect_code(controller(&config, &cluster).notify(&context), OcfExitCode::Success)?;
    Ok(())
}

#[test]
fn notify_logs_promotion_target() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    let context = NotifyContext {
        kind: Some("post".to_owned()),
        operation: Some("promote".to_owned()),
        promote_uname: Some("db2".to_owned()),
        ..NotifyContext::default()
    };

    let (logs, code) = capture_info_logs(|| controller(&config, &cluster).notify(&context));
    expect_code(code, OcfExitCode::Success)?;
    ensure!(
        logs.iter()
            .any(|line| line.contains("promote notification") && line.contains("db2")),
        "missing promote notification in {logs:?}"
    );
    Ok(())
}

#[rstest]
#[case(None, "pgsql:0 is down")]
#[case(Some(Role::Standby), "pgsql:0 is up (standby)")]
#[case(Some(Role::Primary), "pgsql:0 is up (primary)")]
fn status_reports_up_or_down(#[case] role: Option<Role>, #[case] expected: &str) -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = instance_config_in(root.path())?;
    let cluster = FakeCluster::default();
    cluster.role.set(role);

    let mut out = Vec::new();
    expect_code(controller(&config, &cluster).status(&mut out), OcfExitCode::Success)?;
    let line = String::from_utf8(out)?;
    ensure!(line == format!("{expected}\n"), "unexpected status line {line:?}");
    Ok(())
}
