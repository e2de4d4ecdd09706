/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Tensor descriptors shared by the codec and the engine.

use std::fmt;

use serde::Serialize;
use tract_onnx::prelude::tract_ndarray::Array4;

/// Element types the pipeline can feed to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    U8,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::F32 => f.write_str("f32"),
            ElementType::U8 => f.write_str("u8"),
        }
    }
}

/// Affine quantization: `real = (q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantization {
    pub scale: f32,
    pub zero_point: i32,
}

impl Quantization {
    /// A zero scale carries no information and is treated as "not quantized".
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        self.scale != 0.0 && self.scale.is_finite()
    }
}

/// How real-valued samples in `[0, 1]` are mapped onto a `u8` model input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputScaling {
    /// Feed the `0..=255` pixel range directly, ignoring the model's input
    /// quantization parameters.
    #[default]
    FullRange,
    /// Quantize with the model's own `(scale, zero_point)`. Falls back to
    /// `FullRange` when the input carries no usable parameters.
    Affine,
}

/// Input contract of a loaded model, NHWC with batch 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorSpec {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub dtype: ElementType,
    pub quantization: Option<Quantization>,
}

impl TensorSpec {
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, self.channels]
    }

    /// Check that `tensor` matches this spec exactly.
    ///
    /// # Errors
    ///
    /// Returns `VisionError::ShapeMismatch` on any shape or dtype difference.
    pub fn check(&self, tensor: &ImageTensor) -> Result<(), crate::VisionError> {
        let actual = tensor.shape();
        if actual != self.shape() || tensor.dtype() != self.dtype {
            return Err(crate::VisionError::ShapeMismatch {
                expected: format!("{:?} {}", self.shape(), self.dtype),
                actual: format!("{actual:?} {}", tensor.dtype()),
            });
        }
        Ok(())
    }
}

/// A single preprocessed image, shaped `(1, H, W, C)`.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageTensor {
    F32(Array4<f32>),
    U8(Array4<u8>),
}

impl ImageTensor {
    #[must_use]
    pub fn shape(&self) -> [usize; 4] {
        let dims = match self {
            ImageTensor::F32(a) => a.dim(),
            ImageTensor::U8(a) => a.dim(),
        };
        [dims.0, dims.1, dims.2, dims.3]
    }

    #[must_use]
    pub fn dtype(&self) -> ElementType {
        match self {
            ImageTensor::F32(_) => ElementType::F32,
            ImageTensor::U8(_) => ElementType::U8,
        }
    }
}

/// First model output, flattened.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    F32(Vec<f32>),
    U8 {
        values: Vec<u8>,
        quantization: Option<Quantization>,
    },
}

impl RawOutput {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RawOutput::F32(v) => v.len(),
            RawOutput::U8 { values, .. } => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
