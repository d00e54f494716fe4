//! The event vocabulary flowing into the coordinator.

use crate::state::ProcessReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildEventKind {
    Start,
    Output,
    Success,
    Failure,
}

/// Emitted by the builder actor; `report` is a snapshot of the build
/// subprocess at the moment of the event.
#[derive(Debug, Clone)]
pub struct BuildEvent {
    pub kind: BuildEventKind,
    pub report: ProcessReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEventKind {
    Start,
    Output,
    StopOk,
    StopErr,
    /// The artifact is not on disk yet. Distinct from StopErr.
    Waiting,
}

/// Emitted by the runner actor.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub kind: RunEventKind,
    pub report: ProcessReport,
}

/// User intent, emitted by whichever UI is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    Exit,
    Restart,
    /// Force a republish (redraw) of the current snapshot.
    Update,
    Resize,
    Debug,
}
