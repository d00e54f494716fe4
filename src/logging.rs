//! Logging to flogo.log.
//!
//! The screen belongs to the UI, so all diagnostics go to a file the user
//! can `tail -f`. Timestamps are elapsed-since-start (`[+HH:MM:SS.mmm]`)
//! rather than wall-clock, which makes "how long after the rebuild did this
//! happen" readable at a glance. ANSI colors stay on for the tail.

use std::fmt;
use std::fs::File;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

struct DeltaTimer {
    start: Instant,
}

impl FormatTime for DeltaTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        w.write_str(&format_delta(self.start.elapsed()))
    }
}

fn format_delta(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "[+{:02}:{:02}:{:02}.{:03}]",
        total / 3600,
        (total / 60) % 60,
        total % 60,
        elapsed.subsec_millis()
    )
}

/// Install the global subscriber writing to `file`. `VERBOSE` non-empty
/// enables debug-level output.
pub fn init(file: File) {
    let level = if std::env::var("VERBOSE").is_ok_and(|v| !v.is_empty()) {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(Mutex::new(file))
        .with_ansi(true)
        .with_timer(DeltaTimer {
            start: Instant::now(),
        })
        .finish();

    // Tests may have installed a subscriber already; that is fine.
    let _ = tracing::subscriber::set_global_default(subscriber);

    if level == Level::DEBUG {
        tracing::debug!("running in verbose mode due to VERBOSE");
    }
}

/// Write panics to the log and stderr before the default hook aborts the
/// process. The TUI owns the screen, so without this a panic vanishes.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!(%info, "panic: {backtrace}");
        eprintln!("panic: {info}\n{backtrace}");
        default_hook(info);
    }));
}
