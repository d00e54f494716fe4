//! UI variants behind one seam: a full-screen terminal UI and a flat
//! line-per-state-change printer. Both consume snapshot subscriptions and
//! (where applicable) emit [`crate::events::UiEvent`]s back to the
//! coordinator.

pub mod ansi;
mod flat;
mod tui;

pub use flat::FlatUi;
pub use tui::TerminalUi;
