//! The `/.flogo/events` stream.
//!
//! Each connection subscribes to the coordinator's snapshot fan-out and
//! gets one `state` frame per state change plus a `heartbeat` frame every
//! five seconds. A slow browser drops frames instead of stalling the
//! coordinator; whatever frame it does receive is the current truth.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::{BuilderState, ProcessReport, RunnerState, Snapshot};
use crate::subscription::Subscription;
use crate::web::WebState;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct SseMessage<T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: T,
}

#[derive(Serialize)]
struct ProcessMessage {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl From<&ProcessReport> for ProcessMessage {
    fn from(report: &ProcessReport) -> Self {
        ProcessMessage {
            exit_code: report.exit_code,
            stdout: report.stdout.clone(),
            stderr: report.stderr.clone(),
        }
    }
}

#[derive(Serialize)]
struct StatusMessage {
    status: &'static str,
    current: Option<ProcessMessage>,
    previous: Option<ProcessMessage>,
}

impl From<&BuilderState> for StatusMessage {
    fn from(state: &BuilderState) -> Self {
        StatusMessage {
            status: state.status.as_str(),
            current: state.current.as_ref().map(ProcessMessage::from),
            previous: state.previous.as_ref().map(ProcessMessage::from),
        }
    }
}

impl From<&RunnerState> for StatusMessage {
    fn from(state: &RunnerState) -> Self {
        StatusMessage {
            status: state.status.as_str(),
            current: state.current.as_ref().map(ProcessMessage::from),
            previous: state.previous.as_ref().map(ProcessMessage::from),
        }
    }
}

#[derive(Serialize)]
struct StateMessage {
    builder: StatusMessage,
    runner: StatusMessage,
}

#[derive(Serialize)]
struct HeartbeatMessage {
    time: String,
}

#[derive(Serialize)]
struct ConnectedMessage {
    status: &'static str,
    time: String,
}

fn state_payload(snapshot: &Snapshot) -> String {
    let message = SseMessage {
        kind: "state",
        content: StateMessage {
            builder: StatusMessage::from(&snapshot.builder),
            runner: StatusMessage::from(&snapshot.runner),
        },
    };
    serde_json::to_string(&message).unwrap_or_else(|_| "{}".into())
}

fn heartbeat_payload(time: DateTime<Utc>) -> String {
    let message = SseMessage {
        kind: "heartbeat",
        content: HeartbeatMessage {
            time: time.to_rfc3339(),
        },
    };
    serde_json::to_string(&message).unwrap_or_else(|_| "{}".into())
}

fn connected_payload(time: DateTime<Utc>) -> String {
    serde_json::to_string(&ConnectedMessage {
        status: "connected",
        time: time.to_rfc3339(),
    })
    .unwrap_or_else(|_| "{}".into())
}

pub async fn events(State(state): State<Arc<WebState>>) -> impl IntoResponse {
    let subscription = state.snapshots.subscribe();
    let (frame_tx, frame_rx) = mpsc::channel::<Event>(16);
    tokio::spawn(connection(subscription, frame_tx));

    let stream = futures::stream::unfold(frame_rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
    });

    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
}

/// Per-connection pump. Ends when the client goes away (the frame channel
/// closes), which also drops the snapshot subscription.
async fn connection(mut subscription: Subscription<Snapshot>, frames: mpsc::Sender<Event>) {
    let connected = Event::default()
        .event("connected")
        .data(connected_payload(Utc::now()));
    if frames.send(connected).await.is_err() {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick is immediate; the connected frame covers that moment.
    heartbeat.tick().await;

    loop {
        let frame = tokio::select! {
            _ = heartbeat.tick() => Event::default().data(heartbeat_payload(Utc::now())),
            snapshot = subscription.recv() => match snapshot {
                None => break,
                Some(snapshot) => Event::default().data(state_payload(&snapshot)),
            },
        };
        if frames.send(frame).await.is_err() {
            debug!("client closed connection");
            break;
        }
    }
    subscription.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BuildStatus, RunStatus};
    use crate::subscription::SubscriptionManager;

    #[test]
    fn state_payload_shape() {
        let mut snapshot = Snapshot::default();
        snapshot.runner.status = RunStatus::Running;
        snapshot.runner.current = Some(ProcessReport {
            exit_code: None,
            output: "hello\n".into(),
            stdout: "hello\n".into(),
            stderr: String::new(),
        });
        snapshot.builder.status = BuildStatus::Ok;

        let value: serde_json::Value =
            serde_json::from_str(&state_payload(&snapshot)).expect("valid json");
        assert_eq!(value["type"], "state");
        assert_eq!(value["content"]["builder"]["status"], "ok");
        assert_eq!(value["content"]["builder"]["current"], serde_json::Value::Null);
        assert_eq!(value["content"]["runner"]["status"], "running");
        assert_eq!(value["content"]["runner"]["current"]["stdout"], "hello\n");
        assert_eq!(
            value["content"]["runner"]["current"]["exit_code"],
            serde_json::Value::Null
        );
    }

    #[test]
    fn heartbeat_payload_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&heartbeat_payload(Utc::now())).expect("valid json");
        assert_eq!(value["type"], "heartbeat");
        assert!(value["content"]["time"].is_string());
    }

    #[test]
    fn connected_payload_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&connected_payload(Utc::now())).expect("valid json");
        assert_eq!(value["status"], "connected");
        assert!(value["time"].is_string());
    }

    #[tokio::test]
    async fn connection_sends_connected_then_state_frames() {
        let manager: SubscriptionManager<Snapshot> = SubscriptionManager::new();
        let subscription = manager.subscribe();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(connection(subscription, tx));

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("frame");
        assert!(format!("{first:?}").contains("connected"));

        manager.publish(Snapshot::default());
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout")
            .expect("frame");
        assert!(format!("{second:?}").contains("state"));
    }

    #[tokio::test]
    async fn connection_ends_when_client_disconnects() {
        let manager: SubscriptionManager<Snapshot> = SubscriptionManager::new();
        let subscription = manager.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(connection(subscription, tx));

        drop(rx);
        manager.publish(Snapshot::default());

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("connection task should end")
            .expect("no panic");
        // The dead connection's queue is pruned on the next publish.
        manager.publish(Snapshot::default());
        assert_eq!(manager.subscriber_count(), 0);
    }
}
