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

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// Square input size used when the model leaves height/width symbolic.
    #[serde(default)]
    pub img_size: Option<u32>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    #[serde(default)]
    pub affine_input_quantization: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_model_path() -> String {
    "model.tflite".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.65
}

fn default_class_names() -> Vec<String> {
    vec![
        "Normal".to_string(),
        "Pneumonia".to_string(),
        "Tuberculosis".to_string(),
    ]
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

#[derive(Deserialize, Clone, Debug)]
pub struct LineConfig {
    /// Name of the env var holding the channel secret (not the secret itself).
    #[serde(default = "default_channel_secret_env")]
    pub channel_secret_env: String,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_data_api_base")]
    pub data_api_base: String,
    #[serde(default = "default_line_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret_env: default_channel_secret_env(),
            access_token_env: default_access_token_env(),
            api_base: default_api_base(),
            data_api_base: default_data_api_base(),
            timeout_seconds: default_line_timeout(),
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

fn default_channel_secret_env() -> String {
    "CHANNEL_SECRET".to_string()
}

fn default_access_token_env() -> String {
    "CHANNEL_ACCESS_TOKEN".to_string()
}

fn default_api_base() -> String {
    "https://api.line.me".to_string()
}

fn default_data_api_base() -> String {
    "https://api-data.line.me".to_string()
}

fn default_line_timeout() -> u64 {
    30
}

fn default_max_content_bytes() -> usize {
    10_485_760
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Config {
    /// Load configuration from the optional file named by `XRAYBOT_CONFIG`
    /// (default `config.toml`), overlaid with process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `config::ConfigError` if the file is malformed, a value has the
    /// wrong type, or validation fails.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("XRAYBOT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(&config_path, None)
    }

    /// Load from an explicit file path. `env` replaces the process
    /// environment when given.
    ///
    /// Top-level keys map from upper-case names (`MODEL_PATH` → `model_path`),
    /// nested keys use a double underscore (`LINE__API_BASE` → `line.api_base`).
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_from(
        config_path: &str,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("class_names")
                    .source(env),
            )
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(config::ConfigError::Message(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.img_size == Some(0) {
            return Err(config::ConfigError::Message(
                "img_size must be greater than zero".to_string(),
            ));
        }
        if self.model_path.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "model_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
