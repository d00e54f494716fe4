//! Full-screen terminal UI.
//!
//! Raw mode + alternate screen, restored on every exit path including
//! panics. The layout is one status line (builder, runner, upstream), the
//! content pane, and a one-line key help footer. The pane shows build
//! output while the builder has anything other than a clean build, run
//! output otherwise, pinned to the newest lines.

use std::io::Stdout;
use std::time::Duration;

use anyhow::Context;
use arboard::Clipboard;
use crossterm::cursor;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::events::UiEvent;
use crate::state::{BuildStatus, RunStatus, Snapshot};
use crate::subscription::Subscription;
use crate::ui::ansi::render_ansi;

const FOOTER: &str = "Esc/Ctrl-C exit | r restart | d debug | y copy output";

/// Restores the terminal if the UI task unwinds before its own cleanup.
struct TuiGuard {
    cleaned: bool,
}

impl Drop for TuiGuard {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let _ = disable_raw_mode();
        let mut stdout = std::io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);
    }
}

pub struct TerminalUi {
    terminal: ratatui::Terminal<CrosstermBackend<Stdout>>,
    upstream: Url,
}

impl TerminalUi {
    /// Take over the terminal. Errors here mean no full-screen UI is
    /// possible at all and are fatal at startup.
    pub fn new(upstream: Url) -> anyhow::Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut stdout = std::io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen, cursor::Hide) {
            let _ = disable_raw_mode();
            return Err(anyhow::Error::from(err).context("failed to enter alternate screen"));
        }
        match ratatui::Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => Ok(TerminalUi { terminal, upstream }),
            Err(err) => {
                let _ = disable_raw_mode();
                let _ = execute!(std::io::stdout(), LeaveAlternateScreen, cursor::Show);
                Err(anyhow::Error::from(err).context("failed to create terminal"))
            }
        }
    }

    pub async fn run(
        mut self,
        events: Sender<UiEvent>,
        mut snapshots: Subscription<Snapshot>,
        cancel: CancellationToken,
    ) {
        let mut guard = TuiGuard { cleaned: false };
        let _ = self.terminal.clear();

        let mut snapshot = Snapshot::default();
        let mut clipboard = Clipboard::new().ok();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Keep only the newest pending snapshot; intermediate states
            // are already stale.
            while let Some(next) = snapshots.try_recv() {
                snapshot = next;
            }

            let mut exit = false;
            if event::poll(Duration::from_millis(50)).unwrap_or(false)
                && let Ok(event) = event::read()
            {
                match event {
                    Event::Key(key) => match key.code {
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            exit = true;
                        }
                        KeyCode::Esc => {
                            exit = true;
                        }
                        KeyCode::Char('r') => {
                            let _ = events.send(UiEvent::Restart).await;
                        }
                        KeyCode::Char('d') => {
                            let _ = events.send(UiEvent::Debug).await;
                        }
                        KeyCode::Char('y') => {
                            if let (Some(clipboard), Some(output)) =
                                (clipboard.as_mut(), snapshot.relevant_output())
                            {
                                let _ = clipboard.set_text(output.to_string());
                            }
                        }
                        _ => {
                            let _ = events.send(UiEvent::Update).await;
                        }
                    },
                    Event::Resize(_, _) => {
                        let _ = events.send(UiEvent::Resize).await;
                    }
                    _ => {}
                }
            }

            if exit {
                let _ = events.send(UiEvent::Exit).await;
                break;
            }

            self.draw(&snapshot);
        }

        debug!("shutdown tui");
        cleanup_terminal(self.terminal);
        guard.cleaned = true;
    }

    fn draw(&mut self, snapshot: &Snapshot) {
        let status = status_line(snapshot, &self.upstream);
        let content = content_text(snapshot);

        let _ = self.terminal.draw(|frame| {
            let outer = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1),
                    Constraint::Min(1),
                    Constraint::Length(1),
                ])
                .split(frame.area());

            frame.render_widget(Paragraph::new(status), outer[0]);

            // Pin the view to the newest output.
            let visible = outer[1].height.saturating_sub(2) as usize;
            let scroll = content.lines.len().saturating_sub(visible) as u16;
            let pane = Paragraph::new(content)
                .wrap(Wrap { trim: false })
                .scroll((scroll, 0))
                .block(Block::default().borders(Borders::ALL).title("Output"));
            frame.render_widget(pane, outer[1]);

            let footer = Paragraph::new(FOOTER).style(Style::default().fg(Color::Gray));
            frame.render_widget(footer, outer[2]);
        });
    }
}

fn status_line(snapshot: &Snapshot, upstream: &Url) -> Line<'static> {
    let builder_style = match snapshot.builder.status {
        BuildStatus::Compiling => Style::default().fg(Color::Yellow),
        BuildStatus::Failed => Style::default().fg(Color::Red),
        BuildStatus::Ok => Style::default().fg(Color::Green),
    };
    let runner_style = match snapshot.runner.status {
        RunStatus::Waiting => Style::default().fg(Color::Yellow),
        RunStatus::Running => Style::default().fg(Color::Green),
        RunStatus::StopOk => Style::default().fg(Color::Gray),
        RunStatus::StopErr => Style::default().fg(Color::Red),
    };
    Line::from(vec![
        Span::styled(
            format!("builder {}", snapshot.builder.status.as_str()),
            builder_style.add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            format!("runner {}", snapshot.runner.status.as_str()),
            runner_style.add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(upstream.to_string(), Style::default().fg(Color::Yellow)),
    ])
}

fn content_text(snapshot: &Snapshot) -> Text<'static> {
    if let Some(output) = snapshot.relevant_output() {
        return render_ansi(output);
    }
    let placeholder = match snapshot.builder.status {
        BuildStatus::Compiling => "flogo: compiling...",
        BuildStatus::Failed => "flogo: no build output to show.",
        BuildStatus::Ok => "flogo: no run output yet.",
    };
    Text::from(Span::styled(
        placeholder,
        Style::default().fg(Color::DarkGray),
    ))
}

fn cleanup_terminal(mut terminal: ratatui::Terminal<CrosstermBackend<Stdout>>) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show);
    let _ = terminal.show_cursor();
    // Move to a fresh line so the shell prompt renders cleanly.
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProcessReport;

    fn url() -> Url {
        Url::parse("http://localhost:9001").expect("url")
    }

    #[test]
    fn status_line_carries_both_statuses_and_upstream() {
        let snapshot = Snapshot::default();
        let line = status_line(&snapshot, &url());
        let flattened: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert!(flattened.contains("builder ok"));
        assert!(flattened.contains("runner waiting"));
        assert!(flattened.contains("http://localhost:9001"));
    }

    #[test]
    fn content_prefers_build_output_on_failure() {
        let mut snapshot = Snapshot::default();
        snapshot.builder.status = BuildStatus::Failed;
        snapshot.builder.current = Some(ProcessReport {
            exit_code: Some(1),
            output: "main.go:3: undefined: foo\n".into(),
            stdout: String::new(),
            stderr: "main.go:3: undefined: foo\n".into(),
        });

        let text = content_text(&snapshot);
        let flattened: String = text
            .lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .map(|s| s.content.as_ref())
            .collect();
        assert!(flattened.contains("undefined: foo"));
    }

    #[test]
    fn placeholder_tracks_builder_status() {
        let mut snapshot = Snapshot::default();
        snapshot.builder.status = BuildStatus::Compiling;
        let text = content_text(&snapshot);
        let flattened: String = text
            .lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .map(|s| s.content.as_ref())
            .collect();
        assert_eq!(flattened, "flogo: compiling...");
    }
}
