//! Filesystem watcher.
//!
//! Watches the target tree recursively through the OS notification
//! facility and forwards a build trigger for every relevant change. Only
//! creates and data writes to source files count; renames and removals are
//! ignored because editor save-via-rename patterns would otherwise trigger
//! spurious rebuilds. `vendor` and hidden directories are skipped.

use std::path::{Component, Path, PathBuf};

use anyhow::anyhow;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ActorKind, FatalError};

pub struct Watcher {
    pub target: PathBuf,
    pub extension: String,
    /// Build triggers, consumed by the builder's debouncer.
    pub triggers: mpsc::Sender<()>,
    pub fatal: mpsc::Sender<FatalError>,
    pub cancel: CancellationToken,
}

impl Watcher {
    pub async fn run(self) {
        let root = std::fs::canonicalize(&self.target).unwrap_or_else(|_| self.target.clone());

        let (raw_tx, mut raw_rx) = mpsc::channel::<Result<Event, notify::Error>>(64);
        let forward = move |result| {
            // Dropped events are fine: any one surviving event of a burst
            // triggers the same debounced build.
            let _ = raw_tx.try_send(result);
        };
        let mut backend = match notify::recommended_watcher(forward) {
            Ok(backend) => backend,
            Err(err) => {
                self.die(anyhow!(err).context("failed to create watcher")).await;
                return;
            }
        };
        if let Err(err) = backend.watch(&root, RecursiveMode::Recursive) {
            self.die(anyhow!(err).context(format!("failed to watch {}", root.display())))
                .await;
            return;
        }
        info!(target = %root.display(), "watcher started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("shutdown watcher");
                    return;
                }
                event = raw_rx.recv() => match event {
                    None => return,
                    Some(Ok(event)) => self.handle(&root, event),
                    Some(Err(err)) => {
                        self.die(anyhow!(err).context("watcher backend error")).await;
                        return;
                    }
                }
            }
        }
    }

    fn handle(&self, root: &Path, event: Event) {
        if !is_relevant_kind(&event.kind) {
            return;
        }
        for path in &event.paths {
            if is_relevant_path(root, path, &self.extension) {
                debug!(path = %path.display(), kind = ?event.kind, "source change");
                let _ = self.triggers.try_send(());
                return;
            }
        }
    }

    async fn die(&self, err: anyhow::Error) {
        let _ = self
            .fatal
            .send(FatalError::actor(ActorKind::Watcher, err))
            .await;
    }
}

/// Creates and data writes rebuild; renames, removals and metadata noise
/// do not.
fn is_relevant_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
    )
}

fn is_relevant_path(root: &Path, path: &Path, extension: &str) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some(extension) {
        return false;
    }
    // Judge only the part below the watch root, so a project living under a
    // hidden directory still works.
    let relative = path.strip_prefix(root).unwrap_or(path);
    !relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name == "vendor" || name.starts_with('.')
        }
        _ => false,
    })
}
