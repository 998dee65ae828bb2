//! Reads the resource configuration the cluster manager injects through the
//! environment.
//!
//! Every field has a default so the agent stays runnable unconfigured, which
//! `meta-data` and `methods` rely on. Empty values are treated as unset,
//! matching how the manager passes blank optional parameters.

use std::env::{self, VarError};
use std::str::FromStr;

use camino::Utf8PathBuf;

use crate::error::{ConfigError, ConfigResult};

const RESKEY_PREFIX: &str = "OCF_RESKEY_";
const RESOURCE_INSTANCE_ENV: &str = "OCF_RESOURCE_INSTANCE";
const NOTIFY_PREFIX: &str = "OCF_RESKEY_CRM_meta_notify_";

pub(crate) const DEFAULT_RESOURCE_INSTANCE: &str = "pgsql";
pub(crate) const DEFAULT_PGCTLCLUSTER: &str = "/usr/bin/pg_ctlcluster";
pub(crate) const DEFAULT_VERSION: &str = "9.1";
pub(crate) const DEFAULT_CLUSTER_NAME: &str = "main";
pub(crate) const DEFAULT_PORT: u16 = 5432;
pub(crate) const DEFAULT_USER: &str = "postgres";
pub(crate) const DEFAULT_PRIMARY: &str = "host=127.0.0.1 port=5431 user=postgres";
pub(crate) const DEFAULT_DATABASE: &str = "template1";
pub(crate) const DEFAULT_SBIN_DIR: &str = "/usr/sbin";
pub(crate) const DEFAULT_RUN_DIR: &str = "/var/run/postgresql";

const RECOVERY_FILE: &str = "recovery.conf";
const TRIGGER_FILE: &str = "_trigger";

/// Immutable per-invocation configuration of the managed PostgreSQL instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Name of the node the agent runs on.
    pub hostname: String,
    /// Resource instance identifier assigned by the cluster manager.
    pub resource_instance: String,
    /// Path to the `pg_ctlcluster` cluster-control binary.
    pub pgctlcluster: Utf8PathBuf,
    /// PostgreSQL major version of the cluster, e.g. `9.1`.
    pub version: String,
    /// Name of the cluster within that version, e.g. `main`.
    pub cluster_name: String,
    /// Port the server listens on.
    pub port: u16,
    /// Unprivileged OS account that owns the cluster.
    pub user: String,
    /// Connection string a standby uses to reach the primary.
    pub primary_conninfo: String,
    /// Optional WAL archive restore command for standbys.
    pub restore_command: Option<String>,
    /// Database used for monitoring connections.
    pub database: String,
    /// Data directory of the cluster.
    pub data_dir: Utf8PathBuf,
    /// Directory holding the PostgreSQL administration binaries.
    pub sbin_dir: Utf8PathBuf,
    /// Runtime directory holding the pid marker and Unix socket.
    pub run_dir: Utf8PathBuf,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            hostname: local_hostname(),
            resource_instance: DEFAULT_RESOURCE_INSTANCE.to_owned(),
            pgctlcluster: Utf8PathBuf::from(DEFAULT_PGCTLCLUSTER),
            version: DEFAULT_VERSION.to_owned(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_owned(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_owned(),
            primary_conninfo: DEFAULT_PRIMARY.to_owned(),
            restore_command: None,
            database: DEFAULT_DATABASE.to_owned(),
            data_dir: default_data_dir(DEFAULT_VERSION, DEFAULT_CLUSTER_NAME),
            sbin_dir: Utf8PathBuf::from(DEFAULT_SBIN_DIR),
            run_dir: Utf8PathBuf::from(DEFAULT_RUN_DIR),
        }
    }
}

impl InstanceConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is not valid UTF-8 or when the
    /// port cannot be parsed.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
                key: key.to_owned(),
            }),
        })
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Propagates lookup failures and rejects unparsable values.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> ConfigResult<Option<String>>,
    {
        let reskey = |name: &str| -> ConfigResult<Option<String>> {
            let key = format!("{RESKEY_PREFIX}{name}");
            lookup(&key).map(non_blank)
        };

        let version = reskey("version")?.unwrap_or_else(|| DEFAULT_VERSION.to_owned());
        let cluster_name =
            reskey("clustername")?.unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_owned());
        let port = reskey("port")?
            .map(|raw| parse_value::<u16>(&format!("{RESKEY_PREFIX}port"), &raw))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);
        let data_dir = reskey("datadir")?
            .map_or_else(|| default_data_dir(&version, &cluster_name), Utf8PathBuf::from);

        Ok(Self {
            hostname: local_hostname(),
            resource_instance: lookup(RESOURCE_INSTANCE_ENV)
                .map(non_blank)?
                .unwrap_or_else(|| DEFAULT_RESOURCE_INSTANCE.to_owned()),
            pgctlcluster: reskey("pgctlcluster")?
                .map_or_else(|| Utf8PathBuf::from(DEFAULT_PGCTLCLUSTER), Utf8PathBuf::from),
            port,
            user: reskey("user")?.unwrap_or_else(|| DEFAULT_USER.to_owned()),
            primary_conninfo: reskey("primary")?.unwrap_or_else(|| DEFAULT_PRIMARY.to_owned()),
            restore_command: reskey("restorecommand")?,
            database: reskey("database")?.unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
            data_dir,
            sbin_dir: reskey("sbindir")?
                .map_or_else(|| Utf8PathBuf::from(DEFAULT_SBIN_DIR), Utf8PathBuf::from),
            run_dir: reskey("rundir")?
                .map_or_else(|| Utf8PathBuf::from(DEFAULT_RUN_DIR), Utf8PathBuf::from),
            version,
            cluster_name,
        })
    }

    /// Marker the server writes while running, keyed by version and cluster.
    #[must_use]
    pub fn pid_file(&self) -> Utf8PathBuf {
        self.run_dir
            .join(format!("{}-{}.pid", self.version, self.cluster_name))
    }

    /// Standby descriptor consumed by the server at startup.
    #[must_use]
    pub fn recovery_file(&self) -> Utf8PathBuf {
        self.data_dir.join(RECOVERY_FILE)
    }

    /// Marker whose creation asks a standby to promote itself.
    #[must_use]
    pub fn trigger_file(&self) -> Utf8PathBuf {
        self.data_dir.join(TRIGGER_FILE)
    }
}

/// Notification details the cluster manager passes to `notify`.
///
/// Every field is optional; missing variables never fail the action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyContext {
    /// `pre` or `post`.
    pub kind: Option<String>,
    /// Operation being notified about, e.g. `promote`.
    pub operation: Option<String>,
    /// Node currently holding the promoted role.
    pub master_uname: Option<String>,
    /// Node being promoted.
    pub promote_uname: Option<String>,
    /// Node being demoted.
    pub demote_uname: Option<String>,
}

impl NotifyContext {
    /// Reads the notification variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the notification variables from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let notify = |name: &str| non_blank(lookup(&format!("{NOTIFY_PREFIX}{name}")));
        Self {
            kind: notify("type"),
            operation: notify("operation"),
            master_uname: notify("master_uname"),
            promote_uname: notify("promote_uname"),
            demote_uname: notify("demote_uname"),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|raw| !raw.is_empty())
}

fn parse_value<T>(key: &str, raw: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key: key.to_owned(),
        value: raw.to_owned(),
        reason: err.to_string(),
    })
}

fn default_data_dir(version: &str, cluster_name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from("/var/lib/postgresql")
        .join(version)
        .join(cluster_name)
}

fn local_hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_owned())
}
