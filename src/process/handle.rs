//! Process lifecycle management.
//!
//! A [`ProcessHandle`] owns exactly one spawn attempt. On a successful
//! start the child is handed to a monitor task that records the exit
//! observation exactly once and services kill requests; the handle talks
//! to it over channels, so exit can be observed through a blocking wait,
//! through the exit notification channel, or both.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

use crate::process::{
    LineReader, OutputLine, ProcessConfig, ProcessError, StreamSource, DEFAULT_LINE_BUFFER,
};

/// Default grace period for [`ProcessHandle::terminate`].
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the control channel between a handle and its monitor task.
const CONTROL_BUFFER: usize = 4;

/// Lifecycle state of a process handle.
///
/// A failed start leaves the handle in `Created`; dispose releases the OS
/// resource without changing the state already observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Created,
    Running,
    Exited,
}

/// What the monitor task observed when the child ended.
#[derive(Debug, Clone)]
enum ExitSnapshot {
    Exited(ExitStatus),
    WaitFailed {
        kind: std::io::ErrorKind,
        message: String,
    },
}

/// Requests serviced by the monitor task.
#[derive(Debug)]
enum Control {
    Kill(oneshot::Sender<std::io::Result<()>>),
}

/// Channels wired up by a successful start.
#[derive(Debug)]
struct Spawned {
    pid: Option<u32>,
    control_tx: mpsc::Sender<Control>,
    stdout_rx: Option<mpsc::Receiver<OutputLine>>,
    stderr_rx: Option<mpsc::Receiver<OutputLine>>,
    exited_rx: Option<oneshot::Receiver<()>>,
}

/// Handle for one spawned OS process (or the attempt to spawn one).
#[derive(Debug, Default)]
pub struct ProcessHandle {
    spawned: Option<Spawned>,
    exit_rx: Option<watch::Receiver<Option<ExitSnapshot>>>,
    disposed: bool,
}

impl ProcessHandle {
    /// Create an empty handle. No OS resource is held until
    /// [`ProcessHandle::start`] succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration, spawn the process, and begin
    /// asynchronous line-reading on each redirected stream.
    ///
    /// Returns `true` when a fresh OS process was created, which is the
    /// only success outcome the platform spawn call can report.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Configuration` if the configuration is
    /// invalid or the handle has already started a process, and
    /// `ProcessError::Launch` if the OS cannot create the process or the
    /// handle has been disposed. A failed start leaves the handle in its
    /// pre-start state.
    pub fn start(&mut self, config: &ProcessConfig) -> Result<bool, ProcessError> {
        if self.disposed {
            return Err(ProcessError::launch_reason("process handle has been disposed"));
        }
        if self.spawned.is_some() || self.exit_rx.is_some() {
            return Err(ProcessError::config("process handle has already been started"));
        }
        config.validate()?;

        let mut child = build_command(config).spawn().map_err(ProcessError::launch)?;
        let pid = child.id();
        tracing::debug!(program = %config.program().display(), pid, "spawned process");

        let stdout_rx = child
            .stdout
            .take()
            .map(|out| LineReader::into_channel(out, StreamSource::Stdout, DEFAULT_LINE_BUFFER));
        let stderr_rx = child
            .stderr
            .take()
            .map(|err| LineReader::into_channel(err, StreamSource::Stderr, DEFAULT_LINE_BUFFER));

        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (exited_tx, exited_rx) = oneshot::channel();
        tokio::spawn(supervise(child, control_rx, exit_tx, exited_tx));

        self.exit_rx = Some(exit_rx);
        self.spawned = Some(Spawned {
            pid,
            control_tx,
            stdout_rx,
            stderr_rx,
            exited_rx: Some(exited_rx),
        });
        Ok(true)
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        if self.has_exited() {
            return None;
        }
        self.spawned.as_ref().and_then(|spawned| spawned.pid)
    }

    /// Whether the process has been observed to exit.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit_rx
            .as_ref()
            .is_some_and(|rx| matches!(*rx.borrow(), Some(ExitSnapshot::Exited(_))))
    }

    /// Current lifecycle state of the handle.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        if self.has_exited() {
            ProcessState::Exited
        } else if self.exit_rx.is_some() {
            ProcessState::Running
        } else {
            ProcessState::Created
        }
    }

    /// Exit code of the terminated process. On Unix a signal death is
    /// reported as the negated signal number.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::NotExited` if the process has not been
    /// observed to exit.
    pub fn exit_code(&self) -> Result<i32, ProcessError> {
        let Some(rx) = self.exit_rx.as_ref() else {
            return Err(ProcessError::NotExited);
        };
        match &*rx.borrow() {
            Some(ExitSnapshot::Exited(status)) => Ok(exit_code_of(*status)),
            _ => Err(ProcessError::NotExited),
        }
    }

    /// Request immediate forced termination of the process. Does not wait
    /// for termination to complete; observe it with [`ProcessHandle::wait`]
    /// or through the exit notification channel.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Control` if no process was started, if the
    /// process has already exited, or if the OS refuses the kill.
    pub async fn kill(&mut self) -> Result<(), ProcessError> {
        let Some(spawned) = self.spawned.as_ref() else {
            return Err(ProcessError::control_reason("no process has been started"));
        };
        if self.has_exited() {
            return Err(ProcessError::control_reason("process has already exited"));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if spawned
            .control_tx
            .send(Control::Kill(reply_tx))
            .await
            .is_err()
        {
            return Err(ProcessError::control_reason("process has already exited"));
        }
        match reply_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ProcessError::control(err)),
            Err(_) => Err(ProcessError::control_reason(
                "process exited before the kill was delivered",
            )),
        }
    }

    /// Suspend until the process terminates.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Wait` if no process was started, if the
    /// handle was disposed before the exit was observed, or if the OS
    /// failed while waiting.
    pub async fn wait(&mut self) -> Result<(), ProcessError> {
        let Some(rx) = self.exit_rx.as_mut() else {
            return Err(ProcessError::wait_reason("no process has been started"));
        };
        let snapshot = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                ProcessError::wait_reason("process handle was disposed before exit was observed")
            })?
            .clone();
        match snapshot {
            Some(ExitSnapshot::WaitFailed { kind, message }) => {
                Err(ProcessError::wait(std::io::Error::new(kind, message)))
            }
            _ => Ok(()),
        }
    }

    /// Suspend until the process terminates or the timeout elapses.
    /// Returns whether the process exited within the timeout; a zero
    /// timeout waits indefinitely and returns `true` once exited.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Wait` under the same conditions as
    /// [`ProcessHandle::wait`]. An ordinary timeout expiry is `Ok(false)`,
    /// never an error.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<bool, ProcessError> {
        if timeout.is_zero() {
            self.wait().await?;
            return Ok(true);
        }
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Ok(false),
        }
    }

    /// Attempt graceful termination with a grace period.
    ///
    /// On Unix, sends SIGTERM first, then falls back to a forced kill when
    /// the grace period elapses. On other platforms, kills immediately.
    /// A process that already exited counts as terminated.
    ///
    /// # Errors
    ///
    /// Returns `ProcessError::Control` if no process was started or the OS
    /// refuses the kill, and `ProcessError::Wait` if waiting out the grace
    /// period fails.
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        if self.spawned.is_none() {
            return Err(ProcessError::control_reason("no process has been started"));
        }
        if self.has_exited() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            self.terminate_unix(grace).await
        }

        #[cfg(not(unix))]
        {
            let _ = grace;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn terminate_unix(&mut self, grace: Duration) -> Result<(), ProcessError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            if self.wait_timeout(grace).await? {
                return Ok(());
            }
        }

        // Grace period elapsed, force kill. The kill can race the exit;
        // an exit observed meanwhile still counts as terminated.
        match self.kill().await {
            Err(_) if self.has_exited() => Ok(()),
            other => other,
        }
    }

    /// Take ownership of the captured stdout line channel.
    ///
    /// This can only be called once; subsequent calls return `None`, as do
    /// calls when stdout redirection was not requested.
    pub fn take_stdout(&mut self) -> Option<mpsc::Receiver<OutputLine>> {
        self.spawned.as_mut().and_then(|spawned| spawned.stdout_rx.take())
    }

    /// Take ownership of the captured stderr line channel.
    ///
    /// This can only be called once; subsequent calls return `None`, as do
    /// calls when stderr redirection was not requested.
    pub fn take_stderr(&mut self) -> Option<mpsc::Receiver<OutputLine>> {
        self.spawned.as_mut().and_then(|spawned| spawned.stderr_rx.take())
    }

    /// Take ownership of the exit notification channel, which fires
    /// exactly once when the process terminates, carrying no payload.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_exited(&mut self) -> Option<oneshot::Receiver<()>> {
        self.spawned.as_mut().and_then(|spawned| spawned.exited_rx.take())
    }

    /// Release the OS process resource. Idempotent and safe on a handle
    /// that was never started. Does not kill the process, and does not
    /// change the lifecycle state already observed; a terminated process
    /// still requires disposal to free OS bookkeeping resources.
    pub fn dispose(&mut self) {
        if let Some(spawned) = self.spawned.take() {
            // Dropping the control channel lets the monitor task unwind
            // and release the child without killing it.
            tracing::debug!(pid = spawned.pid, "disposing process handle");
            drop(spawned);
        }
        self.disposed = true;
    }
}

/// Own the child, record the exit observation exactly once, and service
/// control requests until the handle is disposed.
async fn supervise(
    mut child: Child,
    mut control_rx: mpsc::Receiver<Control>,
    exit_tx: watch::Sender<Option<ExitSnapshot>>,
    exited_tx: oneshot::Sender<()>,
) {
    let snapshot = loop {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => break ExitSnapshot::Exited(status),
                Err(err) => {
                    tracing::error!(error = %err, "failed waiting on child process");
                    break ExitSnapshot::WaitFailed {
                        kind: err.kind(),
                        message: err.to_string(),
                    };
                }
            },
            request = control_rx.recv() => match request {
                Some(Control::Kill(reply)) => {
                    let _ = reply.send(child.start_kill());
                }
                // Handle disposed: release the child without killing it.
                None => return,
            },
        }
    };

    let exited = matches!(snapshot, ExitSnapshot::Exited(_));
    if let ExitSnapshot::Exited(status) = &snapshot {
        tracing::debug!(code = ?status.code(), "process exited");
    }
    let _ = exit_tx.send(Some(snapshot));
    if exited {
        let _ = exited_tx.send(());
    }
}

/// Build the platform command for a validated configuration.
fn build_command(config: &ProcessConfig) -> Command {
    let mut command = if config.uses_shell() {
        let mut shell = shell_command();
        shell.arg(config.shell_command_line());
        shell
    } else {
        let mut direct = Command::new(config.program());
        direct.args(config.get_args());
        if config.stdout_redirected() {
            direct.stdout(Stdio::piped());
        }
        if config.stderr_redirected() {
            direct.stderr(Stdio::piped());
        }
        direct
    };

    if let Some(dir) = config.get_working_dir() {
        command.current_dir(dir);
    }
    command.envs(config.get_env());
    command
}

#[cfg(unix)]
fn shell_command() -> Command {
    let mut command = Command::new("/bin/sh");
    command.arg("-c");
    command
}

#[cfg(not(unix))]
fn shell_command() -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C");
    command
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|signal| -signal))
            .unwrap_or(-1)
    }

    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}
