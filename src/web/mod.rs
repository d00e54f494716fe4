//! HTTP server: browser overlay, SSE event stream, reverse proxy.
//!
//! Three reserved paths under `/.flogo` are handled locally; every other
//! request is proxied to the supervised program's own HTTP surface.

pub mod proxy;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use axum::Router;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{ActorKind, FatalError};
use crate::state::Snapshot;
use crate::subscription::SubscriptionManager;

const INDEX_HTML: &str = include_str!("assets/index.html");
const INJECTOR_JS: &str = include_str!("assets/injector.js");

/// How long the upstream gets to answer the liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct WebState {
    pub snapshots: Arc<SubscriptionManager<Snapshot>>,
    pub upstream: Url,
    /// Short-timeout client for the liveness probe.
    pub probe: reqwest::Client,
    /// Forwarding client for proxied requests.
    pub client: reqwest::Client,
}

impl WebState {
    fn new(
        upstream: Url,
        snapshots: Arc<SubscriptionManager<Snapshot>>,
    ) -> anyhow::Result<Self> {
        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("failed to build probe client")?;
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build proxy client")?;
        Ok(WebState {
            snapshots,
            upstream,
            probe,
            client,
        })
    }
}

pub struct Webserver {
    pub bind: String,
    pub upstream: Url,
    pub snapshots: Arc<SubscriptionManager<Snapshot>>,
    pub fatal: mpsc::Sender<FatalError>,
    pub cancel: CancellationToken,
}

impl Webserver {
    pub async fn run(self) {
        let state = match WebState::new(self.upstream.clone(), Arc::clone(&self.snapshots)) {
            Ok(state) => Arc::new(state),
            Err(err) => {
                let _ = self
                    .fatal
                    .send(FatalError::actor(ActorKind::Webserver, err))
                    .await;
                return;
            }
        };

        let router = Router::new()
            .route("/.flogo", get(overlay))
            .route("/.flogo/injector.js", get(injector))
            .route("/.flogo/events", get(sse::events))
            .fallback(proxy::forward)
            .with_state(state);

        let listener = match tokio::net::TcpListener::bind(&self.bind).await {
            Ok(listener) => listener,
            Err(err) => {
                let _ = self
                    .fatal
                    .send(FatalError::actor(
                        ActorKind::Webserver,
                        anyhow!(err).context(format!("failed to bind {}", self.bind)),
                    ))
                    .await;
                return;
            }
        };
        info!(bind = %self.bind, upstream = %self.upstream, "webserver starting");

        let cancel = self.cancel.clone();
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await });
        if let Err(err) = serve.await {
            let _ = self
                .fatal
                .send(FatalError::actor(
                    ActorKind::Webserver,
                    anyhow!(err).context("webserver failed"),
                ))
                .await;
            return;
        }
        debug!("shutdown webserver");
    }
}

async fn overlay() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn injector() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        INJECTOR_JS,
    )
}
