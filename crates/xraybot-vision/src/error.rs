/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::path::PathBuf;

/// Errors from tensor encoding, model loading and inference.
///
/// Variants are kept distinct so callers can tell an unreadable upload
/// apart from a broken model.
#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("unsupported tensor element type: {0}")]
    UnsupportedTensor(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model produced an empty output")]
    EmptyOutput,
}
