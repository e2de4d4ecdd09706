/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Class labels and the labeled classification result.

use std::cmp::Ordering;

use serde::Serialize;

use crate::VisionError;

/// Ordered class names aligned with the model's output indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassLabelTable {
    names: Vec<String>,
}

impl ClassLabelTable {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Name for `index`, or `class_<index>` when the table is shorter than
    /// the model output.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{index}"))
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f32,
}

/// Winning class plus the full distribution in model index order.
///
/// `label` and `confidence` always equal the argmax entry of `distribution`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    pub distribution: Vec<ClassProbability>,
}

impl ClassificationResult {
    /// Pair `probabilities` with labels and pick the argmax. Ties resolve to
    /// the lowest index.
    ///
    /// # Errors
    ///
    /// Returns `VisionError::EmptyOutput` when `probabilities` is empty.
    pub fn from_probabilities(
        probabilities: &[f32],
        labels: &ClassLabelTable,
    ) -> Result<Self, VisionError> {
        let (best_index, best) = probabilities
            .iter()
            .copied()
            .enumerate()
            .reduce(|best, candidate| {
                if candidate.1.total_cmp(&best.1) == Ordering::Greater {
                    candidate
                } else {
                    best
                }
            })
            .ok_or(VisionError::EmptyOutput)?;

        let distribution = probabilities
            .iter()
            .enumerate()
            .map(|(i, &probability)| ClassProbability {
                label: labels.label(i),
                probability,
            })
            .collect();

        Ok(Self {
            label: labels.label(best_index),
            confidence: best,
            distribution,
        })
    }
}
