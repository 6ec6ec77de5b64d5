use crate::activity;
use crate::child;
use crate::config::SupervisionConfig;
use crate::supervisor::{self, SupervisionOutcome};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long the last instance's relays get to flush leftover output before exit.
const RELAY_DRAIN: Duration = Duration::from_secs(1);

/// Decision returned by the restart policy after an instance ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Launch a fresh child immediately.
    Relaunch,
    /// Stop supervising and exit the program with this code.
    Exit(u8),
}

/// Restart policy.
///
/// Auto-restart governs both voluntary exits and watchdog kills. A
/// termination request always ends the program: 0 if the child honored
/// it, 1 if it had to be killed.
pub fn decide(outcome: SupervisionOutcome, auto_restart: bool) -> RestartDecision {
    match outcome {
        SupervisionOutcome::ChildExited if auto_restart => RestartDecision::Relaunch,
        SupervisionOutcome::ChildExited => RestartDecision::Exit(0),
        SupervisionOutcome::WatchdogKilled if auto_restart => RestartDecision::Relaunch,
        SupervisionOutcome::WatchdogKilled => RestartDecision::Exit(1),
        SupervisionOutcome::ExternallyTerminated { forced: false } => RestartDecision::Exit(0),
        SupervisionOutcome::ExternallyTerminated { forced: true } => RestartDecision::Exit(1),
    }
}

/// Outer supervision loop: launch, supervise, decide, repeat.
///
/// Relaunches happen without any backoff. Returns the program's exit code.
pub async fn run(
    command: &[String],
    config: &SupervisionConfig,
    shutdown: &CancellationToken,
) -> u8 {
    let mut launches: u64 = 0;

    loop {
        if shutdown.is_cancelled() {
            tracing::info!("termination requested between launches, not relaunching");
            return 0;
        }

        launches += 1;
        let (signal, listener) = activity::channel();
        let child = match child::spawn(command, config, signal) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, launch = launches, "failed to launch child");
                if !config.auto_restart {
                    return 1;
                }
                // Retry when the first tick would have noticed a dead child.
                tokio::select! {
                    _ = shutdown.cancelled() => return 0,
                    _ = tokio::time::sleep(config.tick_interval) => continue,
                }
            }
        };

        let outcome = supervisor::supervise(&child, &listener, config, shutdown).await;

        // Don't relaunch or exit before the old child is reaped.
        match tokio::time::timeout(RELAY_DRAIN, child.wait_exit()).await {
            Ok(exit) => {
                tracing::info!(pid = ?child.pid(), status = %exit, ?outcome, "child instance ended")
            }
            Err(_) => tracing::warn!(pid = ?child.pid(), ?outcome, "child not reaped yet"),
        }

        match decide(outcome, config.auto_restart) {
            // Old relays stay detached and finish on their own; a grandchild
            // holding the pipes must not hold up the relaunch.
            RestartDecision::Relaunch => {
                tracing::info!(launch = launches + 1, "relaunching child");
            }
            RestartDecision::Exit(code) => {
                child.drain_relays(RELAY_DRAIN).await;
                return code;
            }
        }
    }
}
