//! Executors that skip the fork so tests run without root.

use crate::error::{PrivilegeError, PrivilegeResult};
use crate::privileges::{Executor, Operation};

/// Runs operations directly in the calling process as the current user.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessExecutor;

impl Executor for InProcessExecutor {
    fn run_as<O: Operation>(&self, _user: &str, operation: &O) -> PrivilegeResult<O::Output> {
        operation.execute().map_err(PrivilegeError::from)
    }
}

/// Behaves as if every privileged child died before reporting a result.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrashingExecutor;

impl Executor for CrashingExecutor {
    fn run_as<O: Operation>(&self, _user: &str, _operation: &O) -> PrivilegeResult<O::Output> {
        Err(PrivilegeError::ChildCrashed {
            detail: "killed by SIGKILL".to_owned(),
        })
    }
}
