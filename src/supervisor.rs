//! Actor wiring and process lifecycle.
//!
//! Construction order and channel shapes follow the data flow: watcher →
//! builder → coordinator → runner, coordinator → UIs. One root
//! cancellation token fans out to every actor; a panic in any actor is
//! converted into a fatal error so the coordinator can shut the whole
//! process down with the right exit code.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::builder::Builder;
use crate::config::{Config, UiKind};
use crate::coordinator::Coordinator;
use crate::error::{ActorKind, FatalError};
use crate::events::UiEvent;
use crate::resolve::{Resolver, own_binary_name};
use crate::runner::Runner;
use crate::state::Snapshot;
use crate::subscription::SubscriptionManager;
use crate::ui::{FlatUi, TerminalUi};
use crate::watcher::Watcher;
use crate::web::Webserver;

pub async fn run(config: Config) -> Result<(), FatalError> {
    let resolver = match Resolver::from_path() {
        Ok(resolver) => resolver,
        Err(err) => {
            return Err(FatalError::actor(ActorKind::Runner, anyhow!(err)));
        }
    };

    let cancel = CancellationToken::new();

    let (to_build_tx, to_build_rx) = mpsc::channel(16);
    let (build_tx, build_rx) = mpsc::channel(64);
    let (run_tx, run_rx) = mpsc::channel(64);
    let (ui_tx, ui_rx) = mpsc::channel(16);
    let (fatal_tx, fatal_rx) = mpsc::channel(8);
    // Depth 2: one restart being handled plus one pending is all the runner
    // can ever make use of.
    let (restart_tx, restart_rx) = mpsc::channel(2);
    let snapshots: Arc<SubscriptionManager<Snapshot>> = Arc::new(SubscriptionManager::new());

    let mut actors = Vec::new();

    let watcher = Watcher {
        target: config.target.clone(),
        extension: config.source_extension.clone(),
        triggers: to_build_tx.clone(),
        fatal: fatal_tx.clone(),
        cancel: cancel.clone(),
    };
    actors.push(spawn_actor(
        ActorKind::Watcher,
        fatal_tx.clone(),
        watcher.run(),
    ));

    let builder = Builder {
        to_build: to_build_rx,
        events: build_tx,
        command: config.build_command.clone(),
        target: config.target.clone(),
        debounce: config.debounce,
        cancel: cancel.clone(),
    };
    actors.push(spawn_actor(
        ActorKind::Builder,
        fatal_tx.clone(),
        builder.run(),
    ));

    let runner = Runner {
        restarts: restart_rx,
        events: run_tx,
        fatal: fatal_tx.clone(),
        target: config.target.clone(),
        resolver,
        own_name: own_binary_name(),
        cancel: cancel.clone(),
    };
    actors.push(spawn_actor(
        ActorKind::Runner,
        fatal_tx.clone(),
        runner.run(),
    ));

    let webserver = Webserver {
        bind: config.bind.clone(),
        upstream: config.upstream.clone(),
        snapshots: Arc::clone(&snapshots),
        fatal: fatal_tx.clone(),
        cancel: cancel.clone(),
    };
    actors.push(spawn_actor(
        ActorKind::Webserver,
        fatal_tx.clone(),
        webserver.run(),
    ));

    match config.ui {
        UiKind::Tcell => {
            let tui = match TerminalUi::new(config.upstream.clone()) {
                Ok(tui) => tui,
                Err(err) => {
                    cancel.cancel();
                    return Err(FatalError::UiInit(err));
                }
            };
            actors.push(spawn_actor(
                ActorKind::Ui,
                fatal_tx.clone(),
                tui.run(ui_tx.clone(), snapshots.subscribe(), cancel.clone()),
            ));
        }
        UiKind::Flat => {
            let flat = FlatUi {
                snapshots: snapshots.subscribe_with_depth(64),
                cancel: cancel.clone(),
            };
            actors.push(spawn_actor(ActorKind::Ui, fatal_tx.clone(), flat.run()));
        }
    }

    // SIGINT/SIGTERM behave like the user asking to exit. Under the TUI's
    // raw mode Ctrl-C arrives as a key event instead; this covers flat mode
    // and kills from outside.
    let signal_ui = ui_tx.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        let Ok(mut interrupt) = signal(SignalKind::interrupt()) else {
            return;
        };
        let Ok(mut terminate) = signal(SignalKind::terminate()) else {
            return;
        };
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        info!("signal received, exiting");
        let _ = signal_ui.send(UiEvent::Exit).await;
    });

    // Kick off the first build immediately; the watcher only covers edits
    // made after startup.
    let _ = to_build_tx.send(()).await;

    let coordinator = Coordinator {
        build_events: build_rx,
        run_events: run_rx,
        ui_events: ui_rx,
        fatal: fatal_rx,
        restarts: restart_tx,
        snapshots: Arc::clone(&snapshots),
        cancel: cancel.clone(),
    };
    let result = coordinator.run().await;

    cancel.cancel();
    // Let every actor observe the cancellation: subprocesses get their
    // interrupt-then-kill window, the terminal restores itself.
    for actor in actors {
        let _ = tokio::time::timeout(Duration::from_secs(5), actor).await;
    }
    result
}

/// Spawn an actor plus a monitor that converts a panic into a fatal error
/// on the coordinator's fatal channel.
fn spawn_actor<F>(
    kind: ActorKind,
    fatal: mpsc::Sender<FatalError>,
    future: F,
) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(future);
    tokio::spawn(async move {
        if let Err(err) = handle.await
            && err.is_panic()
        {
            let _ = fatal
                .send(FatalError::actor(kind, anyhow!("actor panicked: {err}")))
                .await;
        }
    })
}
