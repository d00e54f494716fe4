//! Builder actor.
//!
//! Owns the build subprocess. Raw triggers from the watcher pass through
//! the debouncer; each fire starts the configured build command in the
//! target directory and republishes its lifecycle as [`BuildEvent`]s.
//!
//! A trigger arriving mid-build marks the build dirty instead of starting
//! a second compiler: when the running build stops, exactly one follow-up
//! build runs against the newest sources.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CommandSpec;
use crate::debounce::Debouncer;
use crate::events::{BuildEvent, BuildEventKind};
use crate::process::{ProcessEvent, ProcessEventKind, Subprocess};
use crate::state::ProcessReport;

pub struct Builder {
    pub to_build: mpsc::Receiver<()>,
    pub events: mpsc::Sender<BuildEvent>,
    pub command: CommandSpec,
    pub target: PathBuf,
    pub debounce: Duration,
    pub cancel: CancellationToken,
}

impl Builder {
    pub async fn run(mut self) {
        let mut process = Subprocess::new(
            self.command.program.clone(),
            self.command.args.iter().cloned(),
        );
        process.set_dir(&self.target);
        let mut raw = process.events().subscribe_with_depth(64);
        let (debouncer, mut fires) = Debouncer::spawn(self.debounce, self.cancel.clone());

        let mut building = false;
        let mut dirty = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    process.stop().await;
                    debug!("shutdown builder");
                    return;
                }
                trigger = self.to_build.recv() => match trigger {
                    None => {
                        process.stop().await;
                        return;
                    }
                    Some(()) => debouncer.signal(),
                },
                Some(()) = fires.recv() => {
                    if building {
                        dirty = true;
                    } else {
                        building = self.start_build(&process).await;
                    }
                }
                event = raw.recv() => match event {
                    None => return,
                    Some(event) => {
                        let stopped = event.kind == ProcessEventKind::Stop;
                        self.forward(event).await;
                        if stopped {
                            building = false;
                            if dirty {
                                dirty = false;
                                building = self.start_build(&process).await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns whether a build subprocess is now live.
    async fn start_build(&self, process: &Subprocess) -> bool {
        info!(command = %self.command.display(), "build start");
        match process.start() {
            Ok(()) => true,
            Err(err) => {
                // Spawn failures never produce subprocess events, so the
                // failure is synthesized here.
                let message = format!(
                    "failed to start '{}' in {}: {err}",
                    self.command.display(),
                    self.target.display()
                );
                let report = ProcessReport {
                    exit_code: None,
                    output: message.clone(),
                    stdout: String::new(),
                    stderr: message,
                };
                let _ = self
                    .events
                    .send(BuildEvent {
                        kind: BuildEventKind::Failure,
                        report,
                    })
                    .await;
                false
            }
        }
    }

    async fn forward(&self, event: ProcessEvent) {
        let kind = match event.kind {
            ProcessEventKind::Start => BuildEventKind::Start,
            ProcessEventKind::Output => BuildEventKind::Output,
            ProcessEventKind::Stop if event.report.exit_code == Some(0) => BuildEventKind::Success,
            ProcessEventKind::Stop => BuildEventKind::Failure,
        };
        let _ = self
            .events
            .send(BuildEvent {
                kind,
                report: event.report,
            })
            .await;
    }
}
