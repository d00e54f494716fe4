//! Burst coalescing.
//!
//! A save in most editors produces several filesystem events back to back;
//! one keystroke of `:w` must become one build. The debouncer is a
//! single-slot timer: every signal re-arms the deadline, and only a quiet
//! window of the full duration lets it fire.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle for feeding signals into a running debouncer task.
#[derive(Clone)]
pub struct Debouncer {
    signals: mpsc::Sender<()>,
}

impl Debouncer {
    /// Spawn the debouncer task. Fires are delivered on the returned
    /// receiver; cancellation drops any pending fire.
    pub fn spawn(delay: Duration, cancel: CancellationToken) -> (Self, mpsc::Receiver<()>) {
        // Depth 1 is enough: a queued signal means the timer will be
        // re-armed anyway.
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (fire_tx, fire_rx) = mpsc::channel(1);
        tokio::spawn(run(delay, cancel, signal_rx, fire_tx));
        (
            Debouncer {
                signals: signal_tx,
            },
            fire_rx,
        )
    }

    /// Register a signal. Non-blocking; a signal arriving while one is
    /// already queued coalesces with it.
    pub fn signal(&self) {
        let _ = self.signals.try_send(());
    }
}

async fn run(
    delay: Duration,
    cancel: CancellationToken,
    mut signals: mpsc::Receiver<()>,
    fires: mpsc::Sender<()>,
) {
    loop {
        // Idle: wait for the first signal of a burst.
        tokio::select! {
            _ = cancel.cancelled() => return,
            signal = signals.recv() => {
                if signal.is_none() {
                    return;
                }
            }
        }

        // Armed: each further signal pushes the deadline out.
        let mut deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                signal = signals.recv() => {
                    if signal.is_none() {
                        return;
                    }
                    deadline = Instant::now() + delay;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("debounce fired");
                    let _ = fires.send(()).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(50);

    async fn count_fires(rx: &mut mpsc::Receiver<()>, window: Duration) -> usize {
        let mut fired = 0;
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(())) => fired += 1,
                Ok(None) | Err(_) => return fired,
            }
        }
    }

    #[tokio::test]
    async fn burst_collapses_to_one_fire() {
        let cancel = CancellationToken::new();
        let (debouncer, mut fires) = Debouncer::spawn(DELAY, cancel);

        for _ in 0..20 {
            debouncer.signal();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(count_fires(&mut fires, DELAY * 4).await, 1);
    }

    #[tokio::test]
    async fn separated_bursts_fire_separately() {
        let cancel = CancellationToken::new();
        let (debouncer, mut fires) = Debouncer::spawn(DELAY, cancel);

        debouncer.signal();
        tokio::time::sleep(DELAY * 3).await;
        debouncer.signal();

        assert_eq!(count_fires(&mut fires, DELAY * 4).await, 2);
    }

    #[tokio::test]
    async fn fire_waits_for_quiescence() {
        let cancel = CancellationToken::new();
        let (debouncer, mut fires) = Debouncer::spawn(DELAY, cancel);

        let begun = tokio::time::Instant::now();
        debouncer.signal();
        tokio::time::sleep(DELAY / 2).await;
        debouncer.signal();

        tokio::time::timeout(DELAY * 4, fires.recv())
            .await
            .expect("fire expected")
            .expect("debouncer alive");
        // The second signal pushed the deadline past the original one.
        assert!(begun.elapsed() >= DELAY + DELAY / 2);
    }

    #[tokio::test]
    async fn cancellation_drops_pending_fire() {
        let cancel = CancellationToken::new();
        let (debouncer, mut fires) = Debouncer::spawn(DELAY, cancel.clone());

        debouncer.signal();
        cancel.cancel();

        assert_eq!(count_fires(&mut fires, DELAY * 3).await, 0);
    }
}
