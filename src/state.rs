//! The coordinator's state model.
//!
//! Everything here is a plain value. The coordinator owns the only mutable
//! [`Snapshot`]; every other actor sees clones published through the
//! subscription manager, so a UI can never observe a half-applied
//! transition.

/// One execution of an external program, as observed so far.
///
/// While the process runs `exit_code` is `None` and the buffers grow by
/// whole lines. Once the process stops the report no longer changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub exit_code: Option<i32>,
    /// Interleaved stdout + stderr, in line-arrival order.
    pub output: String,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessReport {
    /// A report that never ran but carries a message, used for synthesized
    /// events (spawn failures, the recursion guard).
    pub fn message(text: impl Into<String>) -> Self {
        let text = text.into();
        ProcessReport {
            exit_code: None,
            output: text.clone(),
            stdout: text,
            stderr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStatus {
    Compiling,
    Failed,
    #[default]
    Ok,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Compiling => "compiling",
            BuildStatus::Failed => "failed",
            BuildStatus::Ok => "ok",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    #[default]
    Waiting,
    Running,
    StopOk,
    StopErr,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Waiting => "waiting",
            RunStatus::Running => "running",
            RunStatus::StopOk => "ok",
            RunStatus::StopErr => "error",
        }
    }
}

/// Builder half of the snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuilderState {
    pub status: BuildStatus,
    pub current: Option<ProcessReport>,
    pub previous: Option<ProcessReport>,
}

impl BuilderState {
    /// A new build is starting: promote `current` to `previous` so the UI
    /// keeps something readable while the build runs.
    pub fn begin(&mut self) {
        if let Some(report) = self.current.take() {
            self.previous = Some(report);
        }
        self.status = BuildStatus::Compiling;
    }

    /// The output to show for this half, newest first.
    pub fn display_output(&self) -> Option<&str> {
        pick_output(self.current.as_ref(), self.previous.as_ref())
    }
}

/// Runner half of the snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerState {
    pub status: RunStatus,
    pub current: Option<ProcessReport>,
    pub previous: Option<ProcessReport>,
}

impl RunnerState {
    /// Same previous-promotion rule as the builder, applied on (re)start.
    pub fn begin(&mut self) {
        if let Some(report) = self.current.take() {
            self.previous = Some(report);
        }
        self.status = RunStatus::Running;
    }

    pub fn display_output(&self) -> Option<&str> {
        pick_output(self.current.as_ref(), self.previous.as_ref())
    }
}

fn pick_output<'a>(
    current: Option<&'a ProcessReport>,
    previous: Option<&'a ProcessReport>,
) -> Option<&'a str> {
    for report in [current, previous].into_iter().flatten() {
        if !report.output.is_empty() {
            return Some(&report.output);
        }
    }
    None
}

/// The root state, published as a value after every transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub builder: BuilderState,
    pub runner: RunnerState,
}

impl Snapshot {
    /// The content pane both UIs show: build output while the builder has
    /// anything other than a clean build, run output otherwise.
    pub fn relevant_output(&self) -> Option<&str> {
        if self.builder.status != BuildStatus::Ok {
            self.builder.display_output()
        } else {
            self.runner.display_output()
        }
    }
}
