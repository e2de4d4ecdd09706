/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Image classification core.
//!
//! - [`codec`]: image bytes → model input tensor, raw model output → probabilities
//! - [`engine`]: the loaded model behind the [`InferenceEngine`] trait
//! - [`classifier`]: codec and engine composed into a single `classify` call

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classifier;
pub mod codec;
pub mod engine;
mod error;
pub mod labels;
pub mod tensor;

pub use classifier::Classifier;
pub use engine::{EngineOptions, InferenceEngine, TractEngine};
pub use error::VisionError;
pub use labels::{ClassLabelTable, ClassProbability, ClassificationResult};
pub use tensor::{ElementType, ImageTensor, InputScaling, Quantization, RawOutput, TensorSpec};
