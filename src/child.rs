/// One supervised child process instance.
///
/// The child's stdout and stderr are always piped so the relays can observe
/// them; stdin is inherited or closed depending on configuration. A waiter
/// task owns the tokio `Child`, reaps it, and writes the exit cell exactly
/// once. Everybody else only reads the cell.
use crate::activity::ActivitySignal;
use crate::config::SupervisionConfig;
use crate::relay::{self, Stream};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed by a signal.
    pub signal: Option<i32>,
}

impl ChildExit {
    /// Placeholder for a child whose status could not be collected.
    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ChildExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Errors that can occur while launching a child.
#[derive(Debug)]
pub enum SpawnError {
    /// No program was given.
    EmptyCommand,
    /// The OS refused to start the process.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// A piped stream was not available after spawning.
    MissingPipe(Stream),
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnError::EmptyCommand => write!(f, "no command given"),
            SpawnError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
            SpawnError::MissingPipe(stream) => {
                write!(f, "child {} pipe was not captured", stream)
            }
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::Spawn { source, .. } => Some(source),
            SpawnError::EmptyCommand | SpawnError::MissingPipe(_) => None,
        }
    }
}

/// Handle to a running (or finished) child instance.
pub struct ChildHandle {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ChildExit>>,
    relays: Vec<JoinHandle<u64>>,
}

/// Launch `command` (program followed by its arguments) and start its relays
/// and waiter task. Must be called from within a tokio runtime.
pub fn spawn(
    command: &[String],
    config: &SupervisionConfig,
    activity: ActivitySignal,
) -> Result<ChildHandle, SpawnError> {
    let (program, args) = command.split_first().ok_or(SpawnError::EmptyCommand)?;

    let stdin = if config.forward_stdin {
        Stdio::inherit()
    } else {
        Stdio::null()
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SpawnError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    let pid = child.id();

    let (stdout, stderr) = match take_pipes(&mut child) {
        Ok(pipes) => pipes,
        Err(e) => {
            let _ = child.start_kill();
            return Err(e);
        }
    };

    tracing::info!(pid = ?pid, command = ?command, "child started");

    let relays = vec![
        tokio::spawn(relay::run(
            Stream::Stdout,
            stdout,
            config.forward_stdout.then(tokio::io::stdout),
            config.relay_buffer_size,
            activity.clone(),
        )),
        tokio::spawn(relay::run(
            Stream::Stderr,
            stderr,
            config.forward_stderr.then(tokio::io::stderr),
            config.relay_buffer_size,
            activity,
        )),
    ];

    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let exit = match child.wait().await {
            Ok(status) => ChildExit::from(status),
            Err(e) => {
                tracing::warn!(error = %e, "failed to wait for child");
                ChildExit::unknown()
            }
        };
        // Receivers may already be gone if the supervisor finished first.
        let _ = tx.send(Some(exit));
    });

    Ok(ChildHandle {
        pid,
        exit: rx,
        relays,
    })
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdout, ChildStderr), SpawnError> {
    let stdout = child
        .stdout
        .take()
        .ok_or(SpawnError::MissingPipe(Stream::Stdout))?;
    let stderr = child
        .stderr
        .take()
        .ok_or(SpawnError::MissingPipe(Stream::Stderr))?;
    Ok((stdout, stderr))
}

impl ChildHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current contents of the exit cell; `None` means still running.
    pub fn exit_status(&self) -> Option<ChildExit> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Wait until the exit cell is written.
    pub async fn wait_exit(&self) -> ChildExit {
        let mut rx = self.exit.clone();
        // An error means the waiter task vanished without reporting (runtime shutdown).
        rx.wait_for(|exit| exit.is_some())
            .await
            .map(|exit| *exit)
            .ok()
            .flatten()
            .unwrap_or_else(ChildExit::unknown)
    }

    /// Ask the child to exit (SIGTERM).
    pub fn terminate(&self) {
        self.deliver(Signal::SIGTERM);
    }

    /// Force the child to exit (SIGKILL).
    pub fn kill(&self) {
        self.deliver(Signal::SIGKILL);
    }

    fn deliver(&self, signal: Signal) {
        // Once reaped, the pid may belong to someone else.
        if self.has_exited() {
            tracing::debug!(?signal, "child already exited, not signalling");
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) => tracing::debug!(pid, ?signal, "signal delivered"),
            Err(errno) => {
                tracing::debug!(pid, ?signal, %errno, "signal delivery failed, ignoring")
            }
        }
    }

    /// Give the relays up to `limit` to copy whatever the child left in its
    /// pipes, then abandon them.
    pub async fn drain_relays(self, limit: Duration) {
        let mut relays = self.relays;
        let drained = tokio::time::timeout(limit, async {
            for relay in relays.iter_mut() {
                let _ = relay.await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("relays still open after child ended, detaching");
            for relay in &relays {
                relay.abort();
            }
        }
    }
}
