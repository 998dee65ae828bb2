//! Throwaway instance layouts for tests.

use std::path::Path;

use camino::Utf8PathBuf;
use color_eyre::eyre::{Context, Result, eyre};
use nix::unistd::{User, getuid};

use crate::config::InstanceConfig;
use crate::error::{PrivilegeError, PrivilegeResult};

/// Returns the name of the account running the tests.
///
/// # Errors
///
/// Returns [`PrivilegeError::UserLookupFailed`] when the current uid has no
/// entry in the user database.
pub fn current_user_name() -> PrivilegeResult<String> {
    let uid = getuid();
    User::from_uid(uid)
        .map_err(|err| PrivilegeError::UserLookupFailed {
            user: uid.to_string(),
            reason: err.to_string(),
        })?
        .map(|user| user.name)
        .ok_or_else(|| PrivilegeError::UserLookupFailed {
            user: uid.to_string(),
            reason: "no entry for current uid".to_owned(),
        })
}

/// Builds a configuration whose data and run directories live under `root`
/// and whose database user is the current account.
///
/// Creates `root/data` and `root/run`; the pid marker is left absent.
///
/// # Errors
///
/// Returns an error when `root` is not UTF-8, the directories cannot be
/// created, or the current user cannot be resolved.
pub fn instance_config_in(root: &Path) -> Result<InstanceConfig> {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf())
        .map_err(|path| eyre!("{} must be UTF-8", path.display()))?;
    let data_dir = root.join("data");
    let run_dir = root.join("run");
    std::fs::create_dir_all(&data_dir).context("create data directory")?;
    std::fs::create_dir_all(&run_dir).context("create run directory")?;

    Ok(InstanceConfig {
        resource_instance: "pgsql:0".to_owned(),
        pgctlcluster: root.join("pg_ctlcluster"),
        user: current_user_name()?,
        data_dir,
        run_dir,
        ..InstanceConfig::default()
    })
}
