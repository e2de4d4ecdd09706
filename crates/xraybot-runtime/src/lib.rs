/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Shared runtime utilities for xraybot services.
//!
//! - [`shutdown_signal`]: graceful SIGINT/SIGTERM handler
//! - [`load_dotenv`]: `.env` loading before the async runtime starts

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]

use std::path::Path;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Wait for SIGINT (ctrl-c) or SIGTERM, then return.
///
/// Use with `axum::serve(...).with_graceful_shutdown(...)`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| error!(error = %e, "ctrl-c handler failed"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// .env loading
// ---------------------------------------------------------------------------

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments.
/// Surrounding quotes on the value are stripped.
#[must_use]
pub fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, val) = line.split_once('=')?;
            let key = key.trim().trim_start_matches("export ").trim();
            if key.is_empty() {
                return None;
            }
            let val = val.trim();
            let val = val
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| val.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(val);
            Some((key.to_string(), val.to_string()))
        })
        .collect()
}

/// Load `path` into the process environment. Variables already set win.
///
/// Must be called from `main()` before the tokio runtime is built, while
/// the process is still single-threaded.
pub fn load_dotenv(path: &Path) {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            for (key, val) in parse_dotenv(&contents) {
                if std::env::var_os(&key).is_some() {
                    continue;
                }
                std::env::set_var(&key, val);
                eprintln!(".env: loaded {key}");
            }
        }
        Err(e) => {
            eprintln!(".env: not loaded ({e})");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
