//! Error types for the supervisor.
//!
//! Routine build/run failures are *not* errors — they travel as events and
//! end up on screen. The types here cover the remaining cases: bad
//! configuration, subprocess plumbing failures, artifact resolution, and the
//! fatal conditions that map to process exit codes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read flogo.toml.
    #[error("failed to read config at {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    /// Failed to parse flogo.toml.
    #[error("failed to parse config at {path}: {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    /// FLOGO_UPSTREAM (or the config file's `upstream`) is not a URL.
    #[error("failed to parse '{value}' as a URL: {source}")]
    UpstreamParse {
        value: String,
        source: url::ParseError,
    },

    /// FLOGO_UI selects a UI that does not exist.
    #[error("unrecognised UI '{0}' (expected 'tcell' or 'flat')")]
    UnknownUi(String),

    /// The build command must have at least a program name.
    #[error("build_command must not be empty")]
    EmptyBuildCommand,

    /// The target directory does not exist or is not a directory.
    #[error("--target must be an existing directory: {0}")]
    BadTarget(PathBuf),
}

/// Errors from the subprocess abstraction.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Start was called while a child is live.
    #[error("'{0}' is already running")]
    AlreadyRunning(String),

    /// The child could not be spawned.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A stdio pipe could not be acquired after spawn.
    #[error("failed to get {0} pipe")]
    Pipe(&'static str),

    /// Sending an OS signal failed.
    #[error("failed to signal pid {pid} with {signal}")]
    Signal { pid: i32, signal: i32 },

    /// There is no child to signal.
    #[error("process is not running")]
    NotRunning,
}

impl ProcessError {
    /// True when the failure is "the executable is not on disk", which the
    /// runner translates to its Waiting state instead of an error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProcessError::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}

/// Errors from build-artifact resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The `go` tool is not on PATH.
    #[error("'go' not found in PATH: {0}")]
    ToolMissing(#[from] which::Error),

    /// The target is not a module root.
    #[error("no go.mod in {0}, not a module root")]
    MissingManifest(PathBuf),

    /// Listing the package name failed.
    #[error("failed to run '{command}': {reason}")]
    ListFailed { command: String, reason: String },

    /// The package is a library (or otherwise not `main`).
    #[error("package '{0}' is not an executable; only 'main' packages are supported")]
    UnsupportedPackage(String),

    /// The target path could not be made absolute.
    #[error("failed to resolve absolute path of {path}: {source}")]
    Absolute {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Which actor an error escaped from. Determines the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Watcher,
    Builder,
    Runner,
    Webserver,
    Ui,
}

impl ActorKind {
    pub fn name(self) -> &'static str {
        match self {
            ActorKind::Watcher => "watcher",
            ActorKind::Builder => "builder",
            ActorKind::Runner => "runner",
            ActorKind::Webserver => "webserver",
            ActorKind::Ui => "ui",
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Conditions that terminate the whole process. Each maps to an exit code.
#[derive(Debug, Error)]
pub enum FatalError {
    /// flogo.log could not be opened; nothing else runs without the log.
    #[error("failed to open 'flogo.log' for writing: {0}")]
    LogOpen(#[source] io::Error),

    /// Startup configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The terminal UI could not be constructed.
    #[error("failed to create UI: {0}")]
    UiInit(#[source] anyhow::Error),

    /// An actor died. The coordinator shuts everything down in response.
    #[error("{kind} died: {source}")]
    Actor {
        kind: ActorKind,
        #[source]
        source: anyhow::Error,
    },
}

impl FatalError {
    pub fn actor(kind: ActorKind, source: anyhow::Error) -> Self {
        FatalError::Actor { kind, source }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::LogOpen(_) => 1,
            FatalError::Config(ConfigError::UnknownUi(_)) => 3,
            FatalError::Config(_) => 2,
            FatalError::UiInit(_) => 4,
            FatalError::Actor { kind, .. } => match kind {
                ActorKind::Watcher => 10,
                ActorKind::Builder => 11,
                ActorKind::Runner => 12,
                ActorKind::Webserver => 13,
                ActorKind::Ui => 14,
            },
        }
    }
}
