//! Flat UI: one line per state change on stdout.
//!
//! The fallback when stdout is not a terminal (CI, piping into grep) and
//! available explicitly via `FLOGO_UI=flat`.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state::{BuildStatus, Snapshot};
use crate::subscription::Subscription;

pub struct FlatUi {
    pub snapshots: Subscription<Snapshot>,
    pub cancel: CancellationToken,
}

impl FlatUi {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("shutdown flat ui");
                    return;
                }
                snapshot = self.snapshots.recv() => match snapshot {
                    None => return,
                    Some(snapshot) => println!("{}", format_line(&snapshot)),
                }
            }
        }
    }
}

fn format_line(snapshot: &Snapshot) -> String {
    let output = match snapshot.relevant_output() {
        Some(output) => last_line(output),
        None if snapshot.builder.status != BuildStatus::Ok => "no build output",
        None => "no run output",
    };
    format!(
        "builder {}\trunner {}\t{}",
        snapshot.builder.status.as_str(),
        snapshot.runner.status.as_str(),
        output
    )
}

/// Keep the contract literal: one state change, one stdout line.
fn last_line(output: &str) -> &str {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ProcessReport, RunStatus};

    #[test]
    fn shows_runner_output_when_build_is_ok() {
        let mut snapshot = Snapshot::default();
        snapshot.runner.status = RunStatus::Running;
        snapshot.runner.current = Some(ProcessReport {
            exit_code: None,
            output: "listening on :9001\n".into(),
            stdout: "listening on :9001\n".into(),
            stderr: String::new(),
        });

        assert_eq!(
            format_line(&snapshot),
            "builder ok\trunner running\tlistening on :9001"
        );
    }

    #[test]
    fn shows_build_output_when_failing() {
        let mut snapshot = Snapshot::default();
        snapshot.builder.status = BuildStatus::Failed;
        snapshot.builder.current = Some(ProcessReport {
            exit_code: Some(1),
            output: "main.go:3: syntax error\n\n".into(),
            stdout: String::new(),
            stderr: "main.go:3: syntax error\n".into(),
        });

        assert_eq!(
            format_line(&snapshot),
            "builder failed\trunner waiting\tmain.go:3: syntax error"
        );
    }

    #[test]
    fn placeholders_when_nothing_ran_yet() {
        let snapshot = Snapshot::default();
        assert_eq!(
            format_line(&snapshot),
            "builder ok\trunner waiting\tno run output"
        );

        let mut snapshot = Snapshot::default();
        snapshot.builder.status = BuildStatus::Compiling;
        assert_eq!(
            format_line(&snapshot),
            "builder compiling\trunner waiting\tno build output"
        );
    }

    #[test]
    fn multiline_output_collapses_to_the_last_line() {
        assert_eq!(last_line("a\nb\nc\n"), "c");
        assert_eq!(last_line("a\n\n  \n"), "a");
        assert_eq!(last_line(""), "");
    }
}
