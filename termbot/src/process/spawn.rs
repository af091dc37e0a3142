//! Short-lived helper processes (tmux invocations, version probes).
//!
//! Provides async process spawning with:
//! - Concurrent stdout/stderr collection
//! - Timeout support (the child is killed when it elapses)

use anyhow::{Context, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Output line from a spawned process.
#[derive(Debug, Clone)]
enum ProcessOutput {
    Stdout(String),
    Stderr(String),
}

/// Configuration options for spawning a process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// The program to execute.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Timeout for the entire process execution.
    pub timeout: Option<Duration>,
}

impl ProcessOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a timeout for the process.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// `program arg1 arg2`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result from a completed process.
#[derive(Debug)]
pub struct ProcessResult {
    /// Exit status of the process.
    pub status: ExitStatus,

    /// All stdout lines collected.
    pub stdout: Vec<String>,

    /// All stderr lines collected.
    pub stderr: Vec<String>,

    /// Whether the process was killed due to timeout.
    pub timed_out: bool,
}

impl ProcessResult {
    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    /// Get stdout as a single string.
    pub fn stdout_string(&self) -> String {
        self.stdout.join("\n")
    }

    /// Get stderr as a single string.
    pub fn stderr_string(&self) -> String {
        self.stderr.join("\n")
    }
}

/// Whether `err` came from the program not being installed.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

/// Spawn a process and collect all output.
///
/// Stdin is closed. On timeout the child is killed and whatever it printed so far is
/// returned with `timed_out` set.
pub async fn spawn_process(options: ProcessOptions) -> Result<ProcessResult> {
    let mut cmd = Command::new(&options.program);
    cmd.args(&options.args);

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn process: {}", options.program))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ProcessOutput>();

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(ProcessOutput::Stdout(line)).is_err() {
                    break;
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(ProcessOutput::Stderr(line)).is_err() {
                    break;
                }
            }
        });
    }

    // The channel closes once both readers hit EOF.
    drop(tx);

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();
    let mut timed_out = false;

    let collect_future = async {
        while let Some(output) = rx.recv().await {
            match output {
                ProcessOutput::Stdout(line) => stdout_lines.push(line),
                ProcessOutput::Stderr(line) => stderr_lines.push(line),
            }
        }
    };

    if let Some(duration) = options.timeout {
        if timeout(duration, collect_future).await.is_err() {
            timed_out = true;
            let _ = child.kill().await;
        }
    } else {
        collect_future.await;
    }

    let status = child
        .wait()
        .await
        .context("Failed to wait for process to exit")?;

    Ok(ProcessResult {
        status,
        stdout: stdout_lines,
        stderr: stderr_lines,
        timed_out,
    })
}
