//! Runner actor.
//!
//! Owns the built artifact's process. Restart signals arrive from the
//! coordinator after every successful build; each one stops the previous
//! child (if any) and starts the freshly built one. When the artifact is
//! not on disk yet — the first build has not finished — the runner reports
//! Waiting instead of failing.
//!
//! Supervising flogo with flogo would fork forever; when the resolved
//! artifact is this very binary, the runner refuses and says so.

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ActorKind, FatalError};
use crate::events::{RunEvent, RunEventKind};
use crate::process::{ProcessEvent, ProcessEventKind, Subprocess, artifact_exists};
use crate::resolve::{Resolver, is_self};
use crate::state::ProcessReport;

pub struct Runner {
    pub restarts: mpsc::Receiver<()>,
    pub events: mpsc::Sender<RunEvent>,
    pub fatal: mpsc::Sender<FatalError>,
    pub target: PathBuf,
    pub resolver: Resolver,
    /// This supervisor's own binary name, for the recursion guard.
    pub own_name: String,
    pub cancel: CancellationToken,
}

impl Runner {
    pub async fn run(mut self) {
        let artifact = match self.resolver.build_output_abs(&self.target).await {
            Ok(artifact) => artifact,
            Err(err) => {
                let _ = self
                    .fatal
                    .send(FatalError::actor(
                        ActorKind::Runner,
                        anyhow!(err).context("failed to determine build output"),
                    ))
                    .await;
                return;
            }
        };
        info!(artifact = %artifact.display(), "build output");

        if is_self(&artifact, &self.own_name) {
            info!(name = %self.own_name, "refusing to recurse");
            let _ = self
                .events
                .send(RunEvent {
                    kind: RunEventKind::Start,
                    report: ProcessReport::default(),
                })
                .await;
            let _ = self
                .events
                .send(RunEvent {
                    kind: RunEventKind::Output,
                    report: ProcessReport::message("refusing recursion"),
                })
                .await;
            return;
        }

        let mut process = Subprocess::new(artifact.to_string_lossy().into_owned(), Vec::new());
        process.set_dir(&self.target);
        let mut raw = process.events().subscribe_with_depth(64);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    process.stop().await;
                    debug!("shutdown runner");
                    return;
                }
                restart = self.restarts.recv() => match restart {
                    None => {
                        process.stop().await;
                        return;
                    }
                    Some(()) => self.restart(&process, &artifact).await,
                },
                event = raw.recv() => match event {
                    None => return,
                    Some(event) => self.forward(event).await,
                }
            }
        }
    }

    async fn restart(&self, process: &Subprocess, artifact: &Path) {
        if !artifact_exists(artifact) {
            info!(artifact = %artifact.display(), "build output doesn't exist");
            let _ = self
                .events
                .send(RunEvent {
                    kind: RunEventKind::Waiting,
                    report: ProcessReport::default(),
                })
                .await;
            return;
        }
        if let Err(err) = process.restart().await {
            if err.is_not_found() {
                // The artifact vanished between the check and the spawn.
                let _ = self
                    .events
                    .send(RunEvent {
                        kind: RunEventKind::Waiting,
                        report: ProcessReport::default(),
                    })
                    .await;
            } else {
                let _ = self
                    .events
                    .send(RunEvent {
                        kind: RunEventKind::StopErr,
                        report: ProcessReport::message(err.to_string()),
                    })
                    .await;
            }
        }
    }

    async fn forward(&self, event: ProcessEvent) {
        let kind = match event.kind {
            ProcessEventKind::Start => RunEventKind::Start,
            ProcessEventKind::Output => RunEventKind::Output,
            ProcessEventKind::Stop if event.report.exit_code == Some(0) => RunEventKind::StopOk,
            ProcessEventKind::Stop => RunEventKind::StopErr,
        };
        let _ = self
            .events
            .send(RunEvent {
                kind,
                report: event.report,
            })
            .await;
    }
}
