//! Runs external commands with merged output capture.
//!
//! Arguments are passed to the program as a vector, so nothing in a
//! configured value is ever reinterpreted by a shell.

use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Command, Stdio};

use camino::Utf8Path;
use tracing::debug;

use crate::error::{CommandError, CommandResult};
use crate::observability::LOG_TARGET;

pub(crate) const OUTPUT_CHAR_LIMIT: usize = 2_048;
pub(crate) const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Program and arguments of one external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<String>,
}

impl CommandLine {
    /// Starts a command line for `program`.
    #[must_use]
    pub fn new(program: &Utf8Path) -> Self {
        Self {
            program: program.as_os_str().to_owned(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the argument vector, excluding the program.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Executes external commands on behalf of the controller.
pub trait CommandRunner {
    /// Runs `command` to completion and returns its merged stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] when the command exits non-zero,
    /// [`CommandError::Terminated`] when a signal ends it, and spawn or
    /// capture errors when it cannot be run at all.
    fn run(&self, command: &CommandLine) -> CommandResult<String>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &CommandLine) -> CommandResult<String> {
        (**self).run(command)
    }
}

/// Runs commands as real child processes and waits for them synchronously.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, command: &CommandLine) -> CommandResult<String> {
        let rendered = command.to_string();
        let capture_error = |source| CommandError::Capture {
            command: rendered.clone(),
            source,
        };

        // A file rather than a pipe: daemonised children may keep the
        // descriptors open long after the command itself has exited.
        let mut sink = tempfile::tempfile().map_err(capture_error)?;
        let stdout = sink.try_clone().map_err(capture_error)?;
        let stderr = sink.try_clone().map_err(capture_error)?;

        let status = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .map_err(|source| CommandError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        let mut raw = Vec::new();
        sink.seek(SeekFrom::Start(0)).map_err(capture_error)?;
        sink.read_to_end(&mut raw).map_err(capture_error)?;
        let output = String::from_utf8_lossy(&raw).into_owned();

        debug!(
            target: LOG_TARGET,
            command = %rendered,
            status = ?status.code(),
            "command finished"
        );

        if status.success() {
            return Ok(output);
        }
        let output = truncate_output(Cow::Owned(output));
        Err(match status.code() {
            Some(exit_code) => CommandError::Failed {
                command: rendered,
                exit_code,
                output,
            },
            None => CommandError::Terminated {
                command: rendered,
                output,
            },
        })
    }
}

pub(crate) fn truncate_output(text: Cow<'_, str>) -> String {
    let mut out = String::with_capacity(OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.len());
    let mut chars = text.chars();
    for _ in 0..OUTPUT_CHAR_LIMIT {
        match chars.next() {
            Some(ch) => out.push(ch),
            None => return text.into_owned(),
        }
    }

    if chars.next().is_none() {
        return text.into_owned();
    }

    out.push_str(TRUNCATION_SUFFIX);
    out
}
