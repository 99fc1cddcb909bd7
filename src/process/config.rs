//! Process launch configuration.
//!
//! This module provides a builder pattern for describing an external
//! process: executable, arguments, working directory, environment
//! overrides, and stream-capture flags. A configuration is immutable once
//! handed to [`ProcessHandle::start`](crate::process::ProcessHandle::start).

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::process::ProcessError;

/// Configuration for one external process launch.
///
/// Can also be deserialized from a TOML file, see
/// [`ProcessConfig::from_toml_file`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    redirect_stdout: bool,
    redirect_stderr: bool,
    use_shell: bool,
}

impl ProcessConfig {
    /// Create a new configuration for the given executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment override visible to the process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Capture the standard output stream instead of passing it through.
    #[must_use]
    pub fn redirect_stdout(mut self, redirect: bool) -> Self {
        self.redirect_stdout = redirect;
        self
    }

    /// Capture the standard error stream instead of passing it through.
    #[must_use]
    pub fn redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    /// Run the command through the platform shell. The shell owns the
    /// process streams, so shell execution cannot be combined with stream
    /// redirection; [`ProcessConfig::validate`] rejects that combination.
    #[must_use]
    pub fn use_shell(mut self, use_shell: bool) -> Self {
        self.use_shell = use_shell;
        self
    }

    /// Get the executable path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Get the argument list.
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the environment overrides.
    #[must_use]
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Whether standard output is captured.
    #[must_use]
    pub fn stdout_redirected(&self) -> bool {
        self.redirect_stdout
    }

    /// Whether standard error is captured.
    #[must_use]
    pub fn stderr_redirected(&self) -> bool {
        self.redirect_stderr
    }

    /// Whether the command runs through the platform shell.
    #[must_use]
    pub fn uses_shell(&self) -> bool {
        self.use_shell
    }

    /// Check that the configuration is structurally usable.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Configuration` if the executable path is
    /// empty, or if shell execution is combined with stream redirection.
    pub fn validate(&self) -> Result<(), ProcessError> {
        if self.program.as_os_str().is_empty() {
            return Err(ProcessError::config("executable path is empty"));
        }
        if self.use_shell && (self.redirect_stdout || self.redirect_stderr) {
            return Err(ProcessError::config(
                "stream redirection cannot be combined with shell execution",
            ));
        }
        Ok(())
    }

    /// Render the program and arguments as one quoted command line for the
    /// platform shell.
    #[must_use]
    pub fn shell_command_line(&self) -> String {
        let mut pieces = Vec::with_capacity(self.args.len() + 1);
        pieces.push(shell_escape::escape(self.program.to_string_lossy()).into_owned());
        for arg in &self.args {
            pieces.push(shell_escape::escape(Cow::Borrowed(arg.as_str())).into_owned());
        }
        pieces.join(" ")
    }

    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Configuration` if the file cannot be read or
    /// parsed, with the underlying failure attached as the cause.
    pub fn from_toml_file(path: &Path) -> Result<Self, ProcessError> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            ProcessError::config_with(format!("failed to read {}", path.display()), err)
        })?;

        toml::from_str(&content).map_err(|err| {
            ProcessError::config_with(format!("failed to parse {}", path.display()), err)
        })
    }
}
