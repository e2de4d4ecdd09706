/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! LINE webhook gateway for chest X-ray screening.
//!
//! Exposes:
//! - `POST /callback`: signed LINE webhook deliveries
//! - `GET  /`: liveness probe
//! - `GET  /health`: loaded model and class table

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod delivery;
mod dispatch;
mod events;
mod line_client;
mod reply;
mod signature;

use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use xraybot_config::Config;
use xraybot_vision::{ClassLabelTable, Classifier, EngineOptions, InputScaling, TractEngine};

use crate::dispatch::Dispatcher;
use crate::line_client::LineClient;

const SERVICE_NAME: &str = "line-gateway";

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    dispatcher: Dispatcher,
    channel_secret: String,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    // Load .env in single-threaded context before spawning the tokio runtime
    xraybot_runtime::load_dotenv(Path::new(".env"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("fatal: failed to build tokio runtime: {e}");
            process::exit(1);
        });
    runtime.block_on(async_main());
}

fn required_secret(var: &str) -> String {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => {
            error!(env = var, "required secret is not set");
            process::exit(1);
        }
    }
}

async fn async_main() {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: failed to load config: {e}");
            process::exit(1);
        }
    };

    let _telemetry_guard = xraybot_telemetry::init_telemetry(SERVICE_NAME, &config.telemetry)
        .unwrap_or_else(|e| {
            eprintln!("fatal: telemetry init failed: {e}");
            process::exit(1);
        });

    info!(service = SERVICE_NAME, "starting");

    let channel_secret = required_secret(&config.line.channel_secret_env);
    let access_token = required_secret(&config.line.access_token_env);

    let options = EngineOptions {
        img_size: config.img_size.map(|s| s as usize),
    };
    let engine = match TractEngine::load(Path::new(&config.model_path), &options) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, path = %config.model_path, "failed to load model");
            process::exit(1);
        }
    };
    let scaling = if config.affine_input_quantization {
        InputScaling::Affine
    } else {
        InputScaling::FullRange
    };
    let classifier = Classifier::new(
        Box::new(engine),
        ClassLabelTable::new(config.class_names.clone()),
        scaling,
    );

    let client = match LineClient::new(&config.line, access_token) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build LINE client");
            process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(
            Arc::new(client),
            Arc::new(classifier),
            config.confidence_threshold,
            config.line.max_content_bytes,
        ),
        channel_secret,
    });

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/callback", post(callback_handler))
        .layer(DefaultBodyLimit::max(1_048_576)) // 1 MiB
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, host = %config.host, "invalid listen address");
            process::exit(1);
        }
    };
    info!(addr = %addr, "line-gateway listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "failed to bind");
            process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(xraybot_runtime::shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    info!("shutting down");
}

// ---------------------------------------------------------------------------
// Security headers middleware (OWASP A05)
// ---------------------------------------------------------------------------

async fn security_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        "X-Content-Type-Options",
        header::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Cache-Control",
        header::HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert(
        "Strict-Transport-Security",
        header::HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    resp
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

async fn root_handler() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let classifier = state.dispatcher.classifier();
    let spec = classifier.input_spec();
    axum::Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "model": {
            "height": spec.height,
            "width": spec.width,
            "channels": spec.channels,
            "dtype": spec.dtype,
            "quantized": spec.quantization.is_some(),
        },
        "classes": classifier.labels().names(),
    }))
}

// ---------------------------------------------------------------------------
// POST /callback: LINE webhook deliveries
// ---------------------------------------------------------------------------

async fn callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sig_header = headers
        .get(signature::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(e) = signature::verify_signature(&state.channel_secret, &body, sig_header) {
        warn!(error = %e, "webhook signature rejected");
        return (StatusCode::BAD_REQUEST, "invalid signature").into_response();
    }

    let events = match events::parse_events(&body) {
        Ok(ev) => ev,
        Err(e) => {
            warn!(error = %e, "malformed webhook body");
            return (StatusCode::BAD_REQUEST, "malformed body").into_response();
        }
    };

    for event in &events {
        let handled = state.dispatcher.handle(event).await;
        debug!(?handled, "event handled");
    }

    (StatusCode::OK, "OK").into_response()
}
