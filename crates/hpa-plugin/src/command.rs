//! External command execution.
//!
//! Signature verification, archive extraction and the vendor install script
//! are external programs. They all run through [`CommandRunner`] so that
//! tests can substitute a runner that never spawns a process.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;

use crate::error::PluginError;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Working directory (inherited if unset)
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Exit status and merged stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty output line, for error messages.
    pub fn last_line(&self) -> Option<&str> {
        self.output.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }

    /// Short human readable description of a failure.
    pub fn describe_failure(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        match self.last_line() {
            Some(line) => format!("{}: {}", status, line),
            None => status,
        }
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion.
    ///
    /// A non-zero exit status is reported in the returned output; `Err` means
    /// the program could not be started at all.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PluginError>;
}

/// Runner that spawns real processes with tokio.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PluginError> {
        debug!(command = %spec, "Running command");

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        for line in text.lines() {
            debug!("{}", line);
        }

        let result = CommandOutput {
            code: output.status.code(),
            output: text,
        };
        debug!(command = %spec, code = ?result.code, "Command finished");
        Ok(result)
    }
}
