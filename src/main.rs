//! procwrap - run external command-line tools with captured output.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use procwrap::process::{
    self, OutputLine, ProcessConfig, ProcessError, ProcessHandle, DEFAULT_TERMINATE_TIMEOUT,
};

#[derive(Parser)]
#[command(
    name = "procwrap",
    about = "Run external command-line tools with captured output",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command and relay its captured output.
    Run {
        /// Load the process configuration from a TOML file.
        #[arg(long, value_name = "FILE", conflicts_with = "command")]
        config: Option<PathBuf>,
        /// Working directory for the child process.
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,
        /// Environment overrides as KEY=VALUE pairs.
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Give up after this many seconds and terminate the child.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Run through the platform shell instead of capturing output.
        #[arg(long)]
        shell: bool,
        /// Command and arguments to execute.
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            required_unless_present = "config"
        )]
        command: Vec<String>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            cwd,
            env,
            timeout,
            shell,
            command,
        } => match run(config, cwd, env, timeout, shell, command).await {
            Ok(code) => u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from),
            Err(err) => {
                tracing::error!(error = %err, "run failed");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(
    config: Option<PathBuf>,
    cwd: Option<PathBuf>,
    env: Vec<String>,
    timeout: Option<u64>,
    shell: bool,
    command: Vec<String>,
) -> Result<i32, ProcessError> {
    let mut config = match config {
        Some(path) => ProcessConfig::from_toml_file(&path)?,
        None => {
            let mut parts = command.into_iter();
            ProcessConfig::new(parts.next().unwrap_or_default())
                .args(parts)
                .redirect_stdout(!shell)
                .redirect_stderr(!shell)
                .use_shell(shell)
        }
    };
    if let Some(dir) = cwd {
        config = config.working_dir(dir);
    }
    for pair in env {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ProcessError::Configuration {
                reason: format!("invalid --env value {pair:?}, expected KEY=VALUE"),
                source: None,
            });
        };
        config = config.env(key, value);
    }

    let mut handle = ProcessHandle::new();
    handle.start(&config)?;
    tracing::info!(pid = handle.pid(), "process started");

    let stdout_task = handle.take_stdout().map(|rx| tokio::spawn(relay_stdout(rx)));
    let stderr_task = handle.take_stderr().map(|rx| tokio::spawn(relay_stderr(rx)));

    let timed_out = match timeout {
        Some(secs) => !handle.wait_timeout(Duration::from_secs(secs)).await?,
        None => {
            handle.wait().await?;
            false
        }
    };
    if timed_out {
        tracing::warn!("timeout expired, terminating process");
        handle.terminate(DEFAULT_TERMINATE_TIMEOUT).await?;
        handle.wait().await?;
    }

    // Let the relay tasks flush any trailing buffered lines.
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let code = handle.exit_code()?;
    tracing::info!(code, "process exited");
    handle.dispose();
    Ok(code)
}

async fn relay_stdout(rx: mpsc::Receiver<OutputLine>) {
    let lines = process::lines(rx);
    futures_util::pin_mut!(lines);
    while let Some(line) = lines.next().await {
        if let Some(text) = line.text() {
            println!("{text}");
        }
    }
}

async fn relay_stderr(rx: mpsc::Receiver<OutputLine>) {
    let lines = process::lines(rx);
    futures_util::pin_mut!(lines);
    while let Some(line) = lines.next().await {
        if let Some(text) = line.text() {
            eprintln!("{}", text.red());
        }
    }
}
