//! OCF exit-code vocabulary understood by the cluster manager.

use std::fmt;
use std::process::ExitCode;

/// Process exit codes defined by the OCF resource-agent API.
///
/// The numeric values are fixed by the cluster manager and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
#[repr(u8)]
pub enum OcfExitCode {
    /// The action succeeded, or the resource runs in the expected role.
    Success = 0,
    /// Generic failure, typically a failed external command.
    ErrGeneric = 1,
    /// The agent was invoked with missing or surplus arguments.
    ErrArgs = 2,
    /// The requested action is not implemented.
    ErrUnimplemented = 3,
    /// The resource is not installed on this node.
    NotInstalled = 5,
    /// The agent configuration is invalid.
    ErrConfigured = 6,
    /// The resource is cleanly stopped.
    NotRunning = 7,
    /// The resource runs in the promoted (primary) role.
    RunningMaster = 8,
}

impl OcfExitCode {
    /// Returns the numeric code handed to the cluster manager.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns the OCF constant name for log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "OCF_SUCCESS",
            Self::ErrGeneric => "OCF_ERR_GENERIC",
            Self::ErrArgs => "OCF_ERR_ARGS",
            Self::ErrUnimplemented => "OCF_ERR_UNIMPLEMENTED",
            Self::NotInstalled => "OCF_ERR_INSTALLED",
            Self::ErrConfigured => "OCF_ERR_CONFIGURED",
            Self::NotRunning => "OCF_NOT_RUNNING",
            Self::RunningMaster => "OCF_RUNNING_MASTER",
        }
    }
}

impl fmt::Display for OcfExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.as_str())
    }
}

impl From<OcfExitCode> for ExitCode {
    fn from(code: OcfExitCode) -> Self {
        Self::from(code.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OcfExitCode::Success, 0)]
    #[case(OcfExitCode::ErrGeneric, 1)]
    #[case(OcfExitCode::NotInstalled, 5)]
    #[case(OcfExitCode::NotRunning, 7)]
    #[case(OcfExitCode::RunningMaster, 8)]
    fn codes_match_ocf_values(#[case] code: OcfExitCode, #[case] expected: u8) {
        assert_eq!(code.code(), expected);
    }

    #[test]
    fn display_includes_constant_name() {
        assert_eq!(OcfExitCode::NotRunning.to_string(), "7 (OCF_NOT_RUNNING)");
    }
}
