/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 *
 * This program is free software: you can redistribute it
 * and/or modify it under the terms of the GNU Affero
 * General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be
 * useful, but WITHOUT ANY WARRANTY; without even the
 * implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public
 * License for more details.
 *
 * You should have received a copy of the GNU Affero General
 * Public License along with this program. If not, see
 * <https://www.gnu.org/licenses/>.
 */

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::Sampler;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use xraybot_config::TelemetryConfig;

/// Errors from telemetry initialization.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("opentelemetry setup failed: {0}")]
    Setup(String),
}

/// Flushes and shuts down the OTLP pipeline on drop.
/// Hold it for the lifetime of `main`.
pub struct TelemetryGuard {
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(ref provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("telemetry shutdown error: {e}");
            }
        }
    }
}

/// Map a configured sample rate onto an OTel sampler.
fn sampler_for(sample_rate: f64) -> Sampler {
    if (sample_rate - 1.0).abs() < f64::EPSILON || sample_rate > 1.0 {
        Sampler::AlwaysOn
    } else if sample_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sample_rate)
    }
}

/// Install the global tracing subscriber: JSON lines to stdout filtered by
/// `RUST_LOG` (default `info`), plus an OTLP span exporter when
/// `config.enabled` is set.
///
/// # Errors
///
/// Returns `TelemetryError` if the OTLP exporter cannot be created
/// (only when `enabled=true`).
pub fn init_telemetry(
    service_name: &str,
    config: &TelemetryConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(true);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return Ok(TelemetryGuard { provider: None });
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::Setup(format!("{e:?}")))?;

    let resource = opentelemetry_sdk::Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_sampler(sampler_for(config.sample_rate))
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(service_name.to_string());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Ok(TelemetryGuard {
        provider: Some(provider),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_drop_without_provider() {
        let guard = TelemetryGuard { provider: None };
        drop(guard); // Must not panic
    }

    #[test]
    fn test_telemetry_error_display() {
        let err = TelemetryError::Setup("test failure".to_string());
        assert_eq!(err.to_string(), "opentelemetry setup failed: test failure");
    }

    #[test]
    fn test_sampler_full_rate_is_always_on() {
        assert!(matches!(sampler_for(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(2.0), Sampler::AlwaysOn));
    }

    #[test]
    fn test_sampler_zero_rate_is_always_off() {
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(-0.5), Sampler::AlwaysOff));
    }

    #[test]
    fn test_sampler_partial_rate_is_ratio_based() {
        match sampler_for(0.25) {
            Sampler::TraceIdRatioBased(r) => assert!((r - 0.25).abs() < f64::EPSILON),
            _ => panic!("expected a ratio-based sampler"),
        }
    }

    #[test]
    fn test_disabled_by_default() {
        let config = TelemetryConfig::default();
        assert!(!config.enabled, "telemetry disabled by default");
        assert_eq!(config.otlp_endpoint, "http://localhost:4317");
    }
}
