/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! User-facing message text.

use std::fmt::Write as _;

use xraybot_vision::ClassificationResult;

const GREETINGS: &[&str] = &["hello", "hi", "hey", "สวัสดี"];

pub const INTRODUCTION: &str = "Hello! I am an X-ray screening assistant.\n\
    Send me a chest X-ray image and I will estimate whether it looks \
    Normal, or shows signs of Pneumonia or Tuberculosis.";

pub const SEND_IMAGE_PROMPT: &str = "Please send a chest X-ray image \
    and I will analyze it for you.";

pub const LOW_CONFIDENCE_CAUTION: &str = "Caution: the model is not confident \
    about this result. Please consult a medical professional.";

pub const DISCLAIMER: &str = "This result is produced by an automated model \
    and is not a medical diagnosis.";

pub const APOLOGY: &str = "Sorry, I could not analyze that image. \
    Please try again with a clear chest X-ray photo.";

/// Canned answer to a text message.
#[must_use]
pub fn format_text(text: &str) -> &'static str {
    let normalized = text.trim().to_lowercase();
    if GREETINGS.contains(&normalized.as_str()) {
        INTRODUCTION
    } else {
        SEND_IMAGE_PROMPT
    }
}

/// Render a classification as a multi-section message.
///
/// Sections: predicted label with confidence, per-class breakdown sorted by
/// descending probability, an optional low-confidence caution when
/// `confidence < threshold`, then the disclaimer.
#[must_use]
pub fn format_classification(result: &ClassificationResult, threshold: f32) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "X-ray result: {}", result.label);
    let _ = writeln!(out, "Confidence: {}", percent(result.confidence));

    let mut ranked: Vec<_> = result.distribution.iter().collect();
    // sort_by is stable: equal probabilities keep model order.
    ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    out.push('\n');
    out.push_str("Breakdown:\n");
    for entry in ranked {
        let _ = writeln!(out, "- {}: {}", entry.label, percent(entry.probability));
    }

    if result.confidence < threshold {
        out.push('\n');
        out.push_str(LOW_CONFIDENCE_CAUTION);
        out.push('\n');
    }

    out.push('\n');
    out.push_str(DISCLAIMER);
    out
}

fn percent(p: f32) -> String {
    format!("{:.2}%", p * 100.0)
}
