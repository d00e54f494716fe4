//! Supervised subprocess.
//!
//! A [`Subprocess`] owns one external command and exposes its lifecycle as
//! events: Start, one Output per captured line, Stop with the exit code.
//! Lines from stdout and stderr land in separate buffers plus a merged one
//! that preserves line-arrival order; the line is the atomic unit, so
//! readers never observe a torn line.
//!
//! At most one child is live at a time. `stop` interrupts, waits up to
//! three seconds, then kills, and does not return until the child is
//! reaped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::state::ProcessReport;
use crate::subscription::SubscriptionManager;

/// How long a child gets between SIGINT and SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEventKind {
    Start,
    Output,
    Stop,
}

/// A lifecycle event plus a snapshot of the buffers at that moment.
#[derive(Debug, Clone)]
pub struct ProcessEvent {
    pub kind: ProcessEventKind,
    pub report: ProcessReport,
}

#[derive(Copy, Clone)]
enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Default)]
struct Buffers {
    exit_code: Option<i32>,
    output: String,
    stdout: String,
    stderr: String,
}

impl Buffers {
    fn append(&mut self, stream: StreamKind, line: &str) {
        let buf = match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        buf.push_str(line);
        buf.push('\n');
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn report(&self) -> ProcessReport {
        ProcessReport {
            exit_code: self.exit_code,
            output: self.output.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

struct Live {
    pid: i32,
    exited: watch::Receiver<bool>,
}

pub struct Subprocess {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    events: Arc<SubscriptionManager<ProcessEvent>>,
    buffers: Arc<Mutex<Buffers>>,
    live: Arc<Mutex<Option<Live>>>,
}

impl Subprocess {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Subprocess {
            program: program.into(),
            args: args.into_iter().collect(),
            dir: None,
            events: Arc::new(SubscriptionManager::new()),
            buffers: Arc::new(Mutex::new(Buffers::default())),
            live: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the working directory for future starts.
    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = Some(dir.into());
    }

    pub fn events(&self) -> &SubscriptionManager<ProcessEvent> {
        &self.events
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// A copy of the buffers as they stand right now.
    #[allow(dead_code)]
    pub fn report(&self) -> ProcessReport {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .report()
    }

    /// Spawn the child. Errors synchronously when a child is already live
    /// or the spawn itself fails; later failures arrive as a Stop event
    /// with a non-zero exit code.
    ///
    /// Resets all three buffers, then publishes Start before any Output.
    pub fn start(&self) -> Result<(), ProcessError> {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.is_some() {
            return Err(ProcessError::AlreadyRunning(self.program.clone()));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(ProcessError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::Pipe("stderr"))?;
        let pid = child.id().map(|p| p as i32).unwrap_or(-1);
        debug!(program = %self.program, pid, "process started");

        let start_report = {
            let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
            *buffers = Buffers::default();
            buffers.report()
        };

        let (exit_tx, exit_rx) = watch::channel(false);
        *live = Some(Live {
            pid,
            exited: exit_rx,
        });

        // Publish Start while still holding the live lock; the readers that
        // produce Output are only spawned below.
        self.events.publish(ProcessEvent {
            kind: ProcessEventKind::Start,
            report: start_report,
        });

        let out_task = tokio::spawn(read_lines(
            stdout,
            StreamKind::Stdout,
            Arc::clone(&self.buffers),
            Arc::clone(&self.events),
        ));
        let err_task = tokio::spawn(read_lines(
            stderr,
            StreamKind::Stderr,
            Arc::clone(&self.buffers),
            Arc::clone(&self.events),
        ));

        let buffers = Arc::clone(&self.buffers);
        let events = Arc::clone(&self.events);
        let live_slot = Arc::clone(&self.live);
        let program = self.program.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            // Both pipes hit EOF once the child is gone; drain them so every
            // Output precedes the Stop below.
            let _ = out_task.await;
            let _ = err_task.await;

            let code = match status {
                Ok(status) => exit_code_of(status),
                Err(err) => {
                    warn!(program = %program, %err, "wait failed");
                    -1
                }
            };
            let report = {
                let mut buffers = buffers.lock().unwrap_or_else(|e| e.into_inner());
                buffers.exit_code = Some(code);
                buffers.report()
            };
            // Publish Stop and clear the live slot under one lock: anyone
            // observing "not running" has already been preceded by the Stop
            // event, so a follow-up Start can never overtake it.
            {
                let mut live = live_slot.lock().unwrap_or_else(|e| e.into_inner());
                events.publish(ProcessEvent {
                    kind: ProcessEventKind::Stop,
                    report,
                });
                *live = None;
            }
            let _ = exit_tx.send(true);
            debug!(program = %program, code, "process exited");
        });

        Ok(())
    }

    /// Interrupt the child, give it [`STOP_GRACE`] to leave, then kill.
    /// Blocks until the child is reaped. No-op when nothing is running.
    pub async fn stop(&self) {
        let Some(mut exited) = ({
            let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
            live.as_ref().map(|l| l.exited.clone())
        }) else {
            return;
        };

        let _ = self.signal(libc::SIGINT);
        if tokio::time::timeout(STOP_GRACE, exited.wait_for(|&done| done))
            .await
            .is_err()
        {
            info!(program = %self.program, "sent SIGKILL");
            let _ = self.signal(libc::SIGKILL);
            let _ = exited.wait_for(|&done| done).await;
        }
    }

    /// Stop then start. No external observer ever sees two children.
    pub async fn restart(&self) -> Result<(), ProcessError> {
        self.stop().await;
        self.start()
    }

    /// Forward an OS signal to the live child.
    pub fn signal(&self, signal: i32) -> Result<(), ProcessError> {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        let live = live.as_ref().ok_or(ProcessError::NotRunning)?;
        // Safety: kill with a valid pid/signal pair has no other
        // preconditions.
        let rc = unsafe { libc::kill(live.pid, signal) };
        if rc != 0 {
            return Err(ProcessError::Signal {
                pid: live.pid,
                signal,
            });
        }
        Ok(())
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

async fn read_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: StreamKind,
    buffers: Arc<Mutex<Buffers>>,
    events: Arc<SubscriptionManager<ProcessEvent>>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let report = {
            let mut buffers = buffers.lock().unwrap_or_else(|e| e.into_inner());
            buffers.append(stream, &line);
            buffers.report()
        };
        events.publish(ProcessEvent {
            kind: ProcessEventKind::Output,
            report,
        });
    }
}

/// Check whether `path` exists on disk; the runner uses this to report
/// Waiting instead of failing to spawn a missing artifact.
pub fn artifact_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::Subscription;

    fn shell(script: &str) -> Subprocess {
        Subprocess::new("sh", ["-c".to_string(), script.to_string()])
    }

    /// Receive events until a Stop arrives (returned last).
    async fn collect_until_stop(sub: &mut Subscription<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for process events")
                .expect("event stream closed early");
            let is_stop = event.kind == ProcessEventKind::Stop;
            events.push(event);
            if is_stop {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn emits_start_output_stop_in_order() {
        let proc = shell("echo hello");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");

        let events = collect_until_stop(&mut sub).await;
        assert_eq!(events.first().unwrap().kind, ProcessEventKind::Start);
        assert_eq!(events.last().unwrap().kind, ProcessEventKind::Stop);
        assert!(
            events
                .iter()
                .any(|e| e.kind == ProcessEventKind::Output && e.report.stdout == "hello\n")
        );
        assert_eq!(events.last().unwrap().report.exit_code, Some(0));
        assert_eq!(proc.report().stdout, "hello\n");
    }

    #[tokio::test]
    async fn separates_stdout_and_stderr() {
        let proc = shell("echo out; echo err 1>&2");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");

        let events = collect_until_stop(&mut sub).await;
        let report = &events.last().unwrap().report;
        assert_eq!(report.stdout, "out\n");
        assert_eq!(report.stderr, "err\n");
        assert!(report.output.contains("out\n"));
        assert!(report.output.contains("err\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let proc = shell("exit 3");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");

        let events = collect_until_stop(&mut sub).await;
        assert_eq!(events.last().unwrap().report.exit_code, Some(3));
    }

    #[tokio::test]
    async fn start_while_running_is_an_error() {
        let proc = shell("sleep 5");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");

        assert!(matches!(
            proc.start(),
            Err(ProcessError::AlreadyRunning(_))
        ));

        proc.stop().await;
        let events = collect_until_stop(&mut sub).await;
        // Exactly one Start despite the second attempt.
        let starts = events
            .iter()
            .filter(|e| e.kind == ProcessEventKind::Start)
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn spawn_failure_is_synchronous_and_silent() {
        let proc = Subprocess::new("/definitely/not/a/binary", Vec::new());
        let mut sub = proc.events().subscribe();

        let err = proc.start().unwrap_err();
        assert!(err.is_not_found());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.try_recv().is_none());
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn stop_is_a_noop_when_idle() {
        let proc = shell("true");
        proc.stop().await;
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn stop_interrupts_a_long_running_child() {
        let proc = shell("sleep 30");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");

        let begun = std::time::Instant::now();
        proc.stop().await;
        assert!(begun.elapsed() < Duration::from_secs(10));

        let events = collect_until_stop(&mut sub).await;
        let code = events.last().unwrap().report.exit_code.unwrap();
        assert_ne!(code, 0);
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn restart_resets_buffers() {
        let proc = shell("echo run");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");
        collect_until_stop(&mut sub).await;
        assert_eq!(proc.report().output, "run\n");

        proc.restart().await.expect("restart");
        collect_until_stop(&mut sub).await;
        // One line, not two: the second start wiped the first run's output.
        assert_eq!(proc.report().output, "run\n");
    }

    #[tokio::test]
    async fn output_ends_at_a_complete_line() {
        let proc = shell("printf 'no newline'");
        let mut sub = proc.events().subscribe();
        proc.start().expect("start");

        let events = collect_until_stop(&mut sub).await;
        // A trailing partial line is still terminated on capture.
        assert_eq!(events.last().unwrap().report.stdout, "no newline\n");
    }

    #[tokio::test]
    async fn signal_requires_a_live_child() {
        let proc = shell("true");
        assert!(matches!(
            proc.signal(libc::SIGINT),
            Err(ProcessError::NotRunning)
        ));
    }
}
