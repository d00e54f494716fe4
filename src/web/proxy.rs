//! Reverse proxy to the supervised program.
//!
//! Everything outside `/.flogo/*` is forwarded to the upstream with the
//! Host rewritten and `X-Forwarded-Host` carrying the original. Before
//! forwarding, a 100 ms probe checks the upstream is answering at all; a
//! dead upstream (starting up, or crashed on bad code) gets a plain 503
//! explanation instead of a connection error in the browser.

use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};
use url::Url;

use crate::web::WebState;

const UNAVAILABLE: &str =
    "Upstream server is not available. Your application is either starting up or has errors.";

/// Request body cap; dev traffic, not a file-upload gateway.
const MAX_BODY: usize = 32 * 1024 * 1024;

pub async fn forward(State(state): State<Arc<WebState>>, request: Request) -> Response {
    if !upstream_alive(&state).await {
        return (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE).into_response();
    }
    match forward_inner(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, "proxy forward failed");
            (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE).into_response()
        }
    }
}

async fn upstream_alive(state: &WebState) -> bool {
    match state.probe.get(state.upstream.clone()).send().await {
        Ok(response) => response.status().as_u16() < 500,
        Err(_) => false,
    }
}

async fn forward_inner(state: &WebState, request: Request) -> anyhow::Result<Response> {
    let (parts, body) = request.into_parts();
    let target = forward_url(&state.upstream, parts.uri.path(), parts.uri.query());
    debug!(method = %parts.method, target = %target, "proxying");

    let original_host = parts.headers.get(header::HOST).cloned();
    let mut headers = strip_hop_headers(&parts.headers);
    if let Some(host) = original_host {
        headers.insert("x-forwarded-host", host);
    }

    let body = axum::body::to_bytes(body, MAX_BODY)
        .await
        .context("failed to read request body")?;

    let upstream_response = state
        .client
        .request(parts.method, target)
        .headers(headers)
        .body(body)
        .send()
        .await
        .context("upstream request failed")?;

    let mut response = Response::builder().status(upstream_response.status());
    for (name, value) in strip_hop_headers(upstream_response.headers()).iter() {
        response = response.header(name, value);
    }
    response
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .context("failed to assemble response")
}

fn forward_url(upstream: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = upstream.clone();
    url.set_path(path);
    url.set_query(query);
    url
}

/// Host is rewritten by the client from the target URL; the connection-level
/// headers must not travel across the proxy.
fn strip_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if name == header::HOST
            || name == header::CONNECTION
            || name == header::TRANSFER_ENCODING
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}
