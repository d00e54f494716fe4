//! The central state machine.
//!
//! One loop owns the root [`Snapshot`] and serialises every mutation:
//! builder events, runner events, UI intents and fatal errors all arrive
//! here and nowhere else. After each applied transition the new snapshot is
//! published to every UI consumer, so publication is the linearisation
//! point — no consumer ever sees a half-applied event.
//!
//! The one cross-actor decision lives here too: a successful build emits a
//! restart to the runner.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::FatalError;
use crate::events::{BuildEvent, BuildEventKind, RunEvent, RunEventKind, UiEvent};
use crate::state::{BuildStatus, RunStatus, Snapshot};
use crate::subscription::SubscriptionManager;

pub struct Coordinator {
    pub build_events: mpsc::Receiver<BuildEvent>,
    pub run_events: mpsc::Receiver<RunEvent>,
    pub ui_events: mpsc::Receiver<UiEvent>,
    pub fatal: mpsc::Receiver<FatalError>,
    /// Restart signals to the runner, sent on build success.
    pub restarts: mpsc::Sender<()>,
    pub snapshots: Arc<SubscriptionManager<Snapshot>>,
    pub cancel: CancellationToken,
}

impl Coordinator {
    /// Run until an Exit intent, cancellation, or a fatal error. The fatal
    /// error (if any) is returned for exit-code mapping.
    pub async fn run(mut self) -> Result<(), FatalError> {
        let mut state = Snapshot::default();
        self.snapshots.publish(state.clone());
        info!("entering main loop");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("shutdown coordinator");
                    return Ok(());
                }
                Some(fatal) = self.fatal.recv() => {
                    error!(%fatal, "actor died");
                    return Err(fatal);
                }
                Some(event) = self.build_events.recv() => {
                    self.apply_build(&mut state, event);
                    self.snapshots.publish(state.clone());
                }
                Some(event) = self.run_events.recv() => {
                    apply_run(&mut state, event);
                    self.snapshots.publish(state.clone());
                }
                event = self.ui_events.recv() => {
                    match event {
                        None => return Ok(()),
                        Some(UiEvent::Exit) => {
                            info!("exit requested");
                            return Ok(());
                        }
                        Some(UiEvent::Restart) => {
                            info!("restart requested");
                            self.request_restart();
                        }
                        Some(event @ (UiEvent::Update | UiEvent::Resize | UiEvent::Debug)) => {
                            debug!(?event, "republish");
                            self.snapshots.publish(state.clone());
                        }
                    }
                }
            }
        }
    }

    fn apply_build(&self, state: &mut Snapshot, event: BuildEvent) {
        match event.kind {
            BuildEventKind::Start => state.builder.begin(),
            BuildEventKind::Output => {
                state.builder.current = Some(event.report);
            }
            BuildEventKind::Success => {
                state.builder.status = BuildStatus::Ok;
                state.builder.current = Some(event.report);
                // The freshly built artifact must replace the running child.
                self.request_restart();
            }
            BuildEventKind::Failure => {
                state.builder.status = BuildStatus::Failed;
                state.builder.current = Some(event.report);
            }
        }
    }

    fn request_restart(&self) {
        // A full queue means a restart is already pending; the runner
        // re-reads the artifact on every start, so that one suffices.
        let _ = self.restarts.try_send(());
    }
}

fn apply_run(state: &mut Snapshot, event: RunEvent) {
    match event.kind {
        RunEventKind::Start => {
            state.runner.begin();
            state.runner.current = Some(event.report);
        }
        RunEventKind::Output => {
            state.runner.current = Some(event.report);
        }
        RunEventKind::StopOk => {
            state.runner.status = RunStatus::StopOk;
            state.runner.current = Some(event.report);
        }
        RunEventKind::StopErr => {
            state.runner.status = RunStatus::StopErr;
            state.runner.current = Some(event.report);
        }
        RunEventKind::Waiting => {
            state.runner.status = RunStatus::Waiting;
        }
    }
}
