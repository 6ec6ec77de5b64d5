/// Supervision of one child instance.
///
/// All decisions live in [`StateMachine`], which is plain synchronous code
/// fed one [`Event`] at a time. [`supervise`] is the async shell around it:
/// it waits on the ticker, the activity signal, the shutdown token and (once
/// terminating) the child's exit cell, turns whichever fires first into an
/// event, and carries out the returned [`Action`].
use crate::activity::ActivityListener;
use crate::child::ChildHandle;
use crate::config::SupervisionConfig;
use crate::watchdog::{self, SilenceCounter, TickVerdict};
use tokio_util::sync::CancellationToken;

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Tick,
    Activity,
    TerminationRequested,
    ChildCompleted,
    GraceExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Terminating,
    Exited,
}

/// How one child instance's supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// The child exited on its own and a tick noticed.
    ChildExited,
    /// The child went silent for too long and was killed.
    WatchdogKilled,
    /// A termination request ended supervision. `forced` is set when the
    /// child outlived the grace period and had to be killed.
    ExternallyTerminated { forced: bool },
}

/// What the caller must do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep waiting for events.
    Continue,
    /// Ask the child to exit and start the grace countdown.
    RequestTermination,
    /// Force-kill the child; supervision ends with the outcome.
    Kill(SupervisionOutcome),
    /// Supervision ends with the outcome; the child is already gone.
    Finish(SupervisionOutcome),
}

/// Per-instance supervision state. Sole owner of the silence counter.
#[derive(Debug)]
pub struct StateMachine {
    phase: Phase,
    silence: SilenceCounter,
}

impl StateMachine {
    pub fn new(max_silent_ticks: u32) -> Self {
        Self {
            phase: Phase::Running,
            silence: SilenceCounter::new(max_silent_ticks),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn silent_ticks(&self) -> u32 {
        self.silence.silent_ticks()
    }

    /// Apply one event. `child_exited` is the current state of the exit cell.
    pub fn handle(&mut self, event: Event, child_exited: bool) -> Action {
        match self.phase {
            Phase::Running => self.handle_running(event, child_exited),
            Phase::Terminating => self.handle_terminating(event),
            Phase::Exited => Action::Continue,
        }
    }

    fn handle_running(&mut self, event: Event, child_exited: bool) -> Action {
        match event {
            Event::Tick if child_exited => {
                tracing::info!("child exited on its own");
                self.finish(Action::Finish(SupervisionOutcome::ChildExited))
            }
            Event::Tick => match self.silence.on_tick() {
                TickVerdict::Tolerated { silent_ticks } => {
                    tracing::debug!(silent_ticks, "silent tick");
                    Action::Continue
                }
                TickVerdict::Exceeded => {
                    tracing::warn!(
                        silent_ticks = self.silence.silent_ticks(),
                        "child produced no output within the limit, killing it"
                    );
                    self.finish(Action::Kill(SupervisionOutcome::WatchdogKilled))
                }
            },
            Event::Activity => {
                self.silence.reset();
                Action::Continue
            }
            Event::TerminationRequested if child_exited => self.finish(Action::Finish(
                SupervisionOutcome::ExternallyTerminated { forced: false },
            )),
            Event::TerminationRequested => {
                tracing::warn!("termination requested, asking child to exit");
                self.phase = Phase::Terminating;
                Action::RequestTermination
            }
            // A voluntary exit is only acted on at the next tick.
            Event::ChildCompleted | Event::GraceExpired => Action::Continue,
        }
    }

    fn handle_terminating(&mut self, event: Event) -> Action {
        match event {
            Event::ChildCompleted => self.finish(Action::Finish(
                SupervisionOutcome::ExternallyTerminated { forced: false },
            )),
            Event::GraceExpired => {
                tracing::warn!("child ignored termination request, killing it");
                self.finish(Action::Kill(SupervisionOutcome::ExternallyTerminated {
                    forced: true,
                }))
            }
            // Liveness bookkeeping stops once termination has begun.
            Event::Tick | Event::Activity | Event::TerminationRequested => Action::Continue,
        }
    }

    fn finish(&mut self, action: Action) -> Action {
        self.phase = Phase::Exited;
        action
    }
}

/// Carry out a terminal action. Returns the outcome once supervision is over.
fn apply(action: Action, child: &ChildHandle) -> Option<SupervisionOutcome> {
    match action {
        Action::Continue | Action::RequestTermination => None,
        Action::Kill(outcome) => {
            child.kill();
            Some(outcome)
        }
        Action::Finish(outcome) => Some(outcome),
    }
}

/// Supervise `child` until its instance ends.
///
/// The ticker starts now, so call this right after launching the child.
pub async fn supervise(
    child: &ChildHandle,
    activity: &ActivityListener,
    config: &SupervisionConfig,
    shutdown: &CancellationToken,
) -> SupervisionOutcome {
    let mut machine = StateMachine::new(config.max_silent_ticks);
    let mut ticks = watchdog::ticker(config.tick_interval);

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Event::TerminationRequested,
            _ = ticks.tick() => Event::Tick,
            _ = activity.raised() => Event::Activity,
        };

        // Ticks are polled before activity so a chatty child can't starve
        // them, but activity that arrived before the tick still counts first.
        if event == Event::Tick && activity.drain_pending().await {
            machine.handle(Event::Activity, child.has_exited());
        }

        let action = machine.handle(event, child.has_exited());
        if action == Action::RequestTermination {
            break;
        }
        if let Some(outcome) = apply(action, child) {
            return outcome;
        }
    }

    // Terminating: no more ticks, only the exit cell and the grace countdown.
    drop(ticks);
    child.terminate();
    let grace = tokio::time::sleep(config.termination_grace);
    tokio::pin!(grace);

    loop {
        let event = tokio::select! {
            _ = child.wait_exit() => Event::ChildCompleted,
            _ = &mut grace => Event::GraceExpired,
        };

        let action = machine.handle(event, child.has_exited());
        if let Some(outcome) = apply(action, child) {
            return outcome;
        }
    }
}
