/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use std::time::Instant;

use tracing::debug;

use crate::codec;
use crate::engine::InferenceEngine;
use crate::labels::{ClassLabelTable, ClassificationResult};
use crate::tensor::{InputScaling, TensorSpec};
use crate::VisionError;

/// Image bytes in, labeled distribution out.
///
/// Holds no per-call state, so one instance can be shared across tasks
/// behind an `Arc`. Calls are CPU bound and should run on a blocking thread.
pub struct Classifier {
    engine: Box<dyn InferenceEngine>,
    labels: ClassLabelTable,
    scaling: InputScaling,
}

impl Classifier {
    #[must_use]
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        labels: ClassLabelTable,
        scaling: InputScaling,
    ) -> Self {
        Self {
            engine,
            labels,
            scaling,
        }
    }

    #[must_use]
    pub fn input_spec(&self) -> &TensorSpec {
        self.engine.input_spec()
    }

    #[must_use]
    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    /// Encode, invoke, decode and label.
    ///
    /// # Errors
    ///
    /// Propagates any `VisionError` from the codec or the engine.
    pub fn classify(&self, image_bytes: &[u8]) -> Result<ClassificationResult, VisionError> {
        let started = Instant::now();
        let tensor = codec::encode(image_bytes, self.engine.input_spec(), self.scaling)?;
        let raw = self.engine.invoke(tensor)?;
        let probabilities = codec::decode(&raw)?;
        let result = ClassificationResult::from_probabilities(&probabilities, &self.labels)?;
        debug!(
            label = %result.label,
            confidence = result.confidence,
            bytes = image_bytes.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "image classified"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("input_spec", self.engine.input_spec())
            .field("labels", &self.labels)
            .field("scaling", &self.scaling)
            .finish()
    }
}
