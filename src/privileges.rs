//! Privilege separation for database-facing work.
//!
//! The agent runs as root because it manages system services, but anything
//! that touches the database or its files must run as the cluster owner.
//! [`ForkExecutor`] forks a child, switches the child's real and effective
//! group and user ids to the target account, runs one narrowly typed
//! [`Operation`], and reports the serialised result back over a pipe. The
//! parent blocks until the child's outcome is known and reaps it.
//!
//! A child that dies without reporting a result surfaces as
//! [`PrivilegeError::ChildCrashed`], never as a successful default value.

use std::fs::File;
use std::io::{Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{
    ForkResult, Gid, Pid, Uid, User, fork, getegid, geteuid, getgid, getuid, pipe, setgroups,
    setresgid, setresuid,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn};

use crate::error::{OperationFailure, PrivilegeError, PrivilegeResult};
use crate::observability::LOG_TARGET;

const CHILD_REPORTED: i32 = 0;
const CHILD_CHANNEL_FAILED: i32 = 70;
const CHILD_PANICKED: i32 = 101;

/// A unit of work that must run under the database owner's identity.
pub trait Operation {
    /// Value reported back to the parent on success.
    type Output: Serialize + DeserializeOwned;

    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Performs the work. Runs inside the privileged child.
    ///
    /// # Errors
    ///
    /// Returns an [`OperationFailure`] describing why the work failed.
    fn execute(&self) -> Result<Self::Output, OperationFailure>;
}

/// Runs operations as another OS user and returns their results.
pub trait Executor {
    /// Runs `operation` as `user`, blocking until its outcome is known.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::UserLookupFailed`] for unknown accounts,
    /// [`PrivilegeError::ChildCrashed`] when no result arrives, and
    /// [`PrivilegeError::Operation`] when the operation itself failed.
    fn run_as<O: Operation>(&self, user: &str, operation: &O) -> PrivilegeResult<O::Output>;
}

impl<X: Executor + ?Sized> Executor for &X {
    fn run_as<O: Operation>(&self, user: &str, operation: &O) -> PrivilegeResult<O::Output> {
        (**self).run_as(user, operation)
    }
}

/// Numeric identity of a resolved account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    name: String,
    uid: Uid,
    gid: Gid,
}

impl Account {
    /// Resolves `user` through the system user database.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::UserLookupFailed`] when the account does not
    /// exist or the lookup itself fails.
    pub fn lookup(user: &str) -> PrivilegeResult<Self> {
        let entry = User::from_name(user)
            .map_err(|err| PrivilegeError::UserLookupFailed {
                user: user.to_owned(),
                reason: err.to_string(),
            })?
            .ok_or_else(|| PrivilegeError::UserLookupFailed {
                user: user.to_owned(),
                reason: "no such user".to_owned(),
            })?;
        Ok(Self {
            name: entry.name,
            uid: entry.uid,
            gid: entry.gid,
        })
    }

    /// Returns the account name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the numeric user id.
    #[must_use]
    pub const fn uid(&self) -> Uid {
        self.uid
    }

    fn is_current_identity(&self) -> bool {
        getuid() == self.uid
            && geteuid() == self.uid
            && getgid() == self.gid
            && getegid() == self.gid
    }
}

/// Message written by the child before it exits.
#[derive(Debug, Serialize, Deserialize)]
enum ChildReport<T> {
    Completed(T),
    Failed(OperationFailure),
    IdentityRejected(String),
}

/// Forks a child per operation and drops the child's privileges before the
/// operation runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkExecutor;

impl ForkExecutor {
    /// Creates an executor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs `body` in a forked child with `account`'s identity.
    pub(crate) fn run_in_child<T, F>(&self, account: &Account, body: F) -> PrivilegeResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, OperationFailure>,
    {
        let (reader, writer) = pipe().map_err(|err| PrivilegeError::Channel(err.into()))?;

        // SAFETY: the child only switches credentials, runs `body`, writes its
        // report and leaves through `_exit`; it never returns into the
        // caller's stack frames.
        match unsafe { fork() }.map_err(PrivilegeError::Fork)? {
            ForkResult::Child => {
                drop(reader);
                let status = child_main(account, File::from(writer), body);
                // SAFETY: `_exit` skips atexit handlers and destructors that
                // belong to the parent's state.
                unsafe { libc::_exit(status) }
            }
            ForkResult::Parent { child } => {
                drop(writer);
                let mut raw = Vec::new();
                let read_result = File::from(reader).read_to_end(&mut raw);
                let status = reap(child)?;
                read_result.map_err(PrivilegeError::Channel)?;
                decode_report(account, status, &raw)
            }
        }
    }
}

impl Executor for ForkExecutor {
    fn run_as<O: Operation>(&self, user: &str, operation: &O) -> PrivilegeResult<O::Output> {
        let span = info_span!(
            target: LOG_TARGET,
            "privileged_operation",
            operation = operation.name(),
            user
        );
        let _entered = span.enter();

        let account = Account::lookup(user)?;
        debug!(
            target: LOG_TARGET,
            uid = account.uid.as_raw(),
            gid = account.gid.as_raw(),
            "running operation in privilege-separated child"
        );
        let result = self.run_in_child(&account, || operation.execute());
        if let Err(err) = result.as_ref() {
            warn!(target: LOG_TARGET, error = %err, "privileged operation failed");
        }
        result
    }
}

fn child_main<T, F>(account: &Account, mut channel: File, body: F) -> i32
where
    T: Serialize,
    F: FnOnce() -> Result<T, OperationFailure>,
{
    let outcome = catch_unwind(AssertUnwindSafe(|| match assume_identity(account) {
        Ok(()) => match body() {
            Ok(value) => ChildReport::Completed(value),
            Err(failure) => ChildReport::Failed(failure),
        },
        Err(err) => ChildReport::IdentityRejected(err.to_string()),
    }));
    let Ok(report) = outcome else {
        return CHILD_PANICKED;
    };
    let written = serde_json::to_writer(&mut channel, &report)
        .map_err(std::io::Error::from)
        .and_then(|()| channel.flush());
    if written.is_ok() {
        CHILD_REPORTED
    } else {
        CHILD_CHANNEL_FAILED
    }
}

fn assume_identity(account: &Account) -> nix::Result<()> {
    if account.is_current_identity() {
        return Ok(());
    }
    // Groups first: once the uid is dropped the process may no longer change
    // them.
    setgroups(&[account.gid])?;
    setresgid(account.gid, account.gid, account.gid)?;
    setresuid(account.uid, account.uid, account.uid)?;
    Ok(())
}

fn reap(child: Pid) -> PrivilegeResult<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => {}
            other => return other.map_err(PrivilegeError::Wait),
        }
    }
}

fn decode_report<T>(account: &Account, status: WaitStatus, raw: &[u8]) -> PrivilegeResult<T>
where
    T: DeserializeOwned,
{
    match status {
        WaitStatus::Exited(_, CHILD_REPORTED) => {}
        WaitStatus::Exited(_, code) => {
            return Err(PrivilegeError::ChildCrashed {
                detail: format!("exited with status {code} before reporting a result"),
            });
        }
        WaitStatus::Signaled(_, signal, _) => {
            return Err(PrivilegeError::ChildCrashed {
                detail: format!("killed by {signal}"),
            });
        }
        other => {
            return Err(PrivilegeError::ChildCrashed {
                detail: format!("unexpected wait status {other:?}"),
            });
        }
    }

    let report: ChildReport<T> =
        serde_json::from_slice(raw).map_err(|err| PrivilegeError::ChildCrashed {
            detail: format!("unreadable result: {err}"),
        })?;
    match report {
        ChildReport::Completed(value) => Ok(value),
        ChildReport::Failed(failure) => Err(PrivilegeError::Operation(failure)),
        ChildReport::IdentityRejected(message) => Err(PrivilegeError::IdentitySwitch {
            user: account.name.clone(),
            message,
        }),
    }
}
