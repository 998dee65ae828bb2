//! Throwaway node layout for driving the compiled agent binary.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::{Command, Output};

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, Result, eyre};
use pg_ha_agent::test_support::current_user_name;
use tempfile::TempDir;

/// Data, run and log directories plus a scripted `pg_ctlcluster`.
#[derive(Debug)]
pub struct AgentSandbox {
    _root: TempDir,
    base: Utf8PathBuf,
    user: String,
    extra_env: Vec<(String, String)>,
}

impl AgentSandbox {
    /// Creates a sandbox whose data and run directories exist and whose
    /// cluster-control script succeeds.
    pub fn new() -> Result<Self> {
        let root = tempfile::tempdir().context("create sandbox tempdir")?;
        let base = Utf8PathBuf::from_path_buf(root.path().to_path_buf())
            .map_err(|path| eyre!("{} must be UTF-8", path.display()))?;
        fs::create_dir_all(base.join("data")).context("create data dir")?;
        fs::create_dir_all(base.join("run")).context("create run dir")?;
        let sandbox = Self {
            _root: root,
            base,
            user: current_user_name()?,
            extra_env: Vec::new(),
        };
        sandbox.script_cluster_control(0)?;
        Ok(sandbox)
    }

    /// Replaces the cluster-control script with one exiting `status`.
    pub fn script_cluster_control(&self, status: i32) -> Result<()> {
        let script = format!(
            "#!/bin/sh\necho \"$*\" >> '{log}'\nexit {status}\n",
            log = self.ctl_log()
        );
        let path = self.ctl_script();
        fs::write(&path, script).with_context(|| format!("write {path}"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {path}"))?;
        Ok(())
    }

    /// Adds a variable passed to every invocation.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Removes the data directory.
    pub fn remove_data_dir(&self) -> Result<()> {
        fs::remove_dir_all(self.data_dir()).context("remove data dir")
    }

    /// Writes the server pid marker.
    pub fn write_pid_marker(&self) -> Result<()> {
        fs::write(self.run_dir().join("9.1-main.pid"), "4242\n").context("write pid marker")
    }

    /// Runs the agent binary with `args` in a scrubbed environment.
    pub fn run(&self, args: &[&str]) -> Result<Output> {
        let mut command = Command::new(env!("CARGO_BIN_EXE_pgsql"));
        command
            .args(args)
            .env_clear()
            .env("OCF_RESOURCE_INSTANCE", "pgsql:1")
            .env("OCF_RESKEY_pgctlcluster", self.ctl_script().as_str())
            .env("OCF_RESKEY_datadir", self.data_dir().as_str())
            .env("OCF_RESKEY_rundir", self.run_dir().as_str())
            .env("OCF_RESKEY_user", &self.user)
            .env("HA_LOGFILE", self.agent_log().as_str());
        for (key, value) in &self.extra_env {
            command.env(key, value);
        }
        command.output().context("run pgsql")
    }

    /// Lines the cluster-control script was invoked with.
    pub fn ctl_calls(&self) -> Result<Vec<String>> {
        match fs::read_to_string(self.ctl_log()) {
            Ok(raw) => Ok(raw.lines().map(str::to_owned).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err).context("read cluster control log"),
        }
    }

    /// Contents of the agent's own log file.
    pub fn agent_log_contents(&self) -> Result<String> {
        fs::read_to_string(self.agent_log()).context("read agent log")
    }

    /// Data directory of the simulated instance.
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.base.join("data")
    }

    fn run_dir(&self) -> Utf8PathBuf {
        self.base.join("run")
    }

    fn ctl_script(&self) -> Utf8PathBuf {
        self.base.join("pg_ctlcluster")
    }

    fn ctl_log(&self) -> Utf8PathBuf {
        self.base.join("pg_ctlcluster.log")
    }

    fn agent_log(&self) -> Utf8PathBuf {
        self.base.join("agent.log")
    }
}
