/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Per-event routing: probe filtering, text replies, image classification.

use std::sync::Arc;

use tracing::{debug, error, info};
use xraybot_vision::{ClassificationResult, Classifier};

use crate::delivery::{deliver, DeliveryOutcome};
use crate::events::{EventPayload, InboundEvent};
use crate::line_client::MessagingClient;
use crate::reply;

/// Reply tokens LINE sends when verifying a webhook URL from the console.
const PROBE_TOKENS: [&str; 2] = [
    "00000000000000000000000000000000",
    "ffffffffffffffffffffffffffffffff",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Probe,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Replied(DeliveryOutcome),
    Skipped(SkipReason),
}

#[derive(Debug, thiserror::Error)]
enum ImageError {
    #[error("content download failed: {0}")]
    Download(#[from] crate::line_client::LineApiError),
    #[error("classification failed: {0}")]
    Vision(#[from] xraybot_vision::VisionError),
    #[error("classification task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub struct Dispatcher {
    client: Arc<dyn MessagingClient>,
    classifier: Arc<Classifier>,
    confidence_threshold: f32,
    max_content_bytes: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        client: Arc<dyn MessagingClient>,
        classifier: Arc<Classifier>,
        confidence_threshold: f32,
        max_content_bytes: usize,
    ) -> Self {
        Self {
            client,
            classifier,
            confidence_threshold,
            max_content_bytes,
        }
    }

    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Handle one event to completion. Never fails: processing errors turn
    /// into an apology message.
    pub async fn handle(&self, event: &InboundEvent) -> Handled {
        if event
            .reply_token
            .as_deref()
            .is_some_and(|t| PROBE_TOKENS.contains(&t))
        {
            debug!("verification probe ignored");
            return Handled::Skipped(SkipReason::Probe);
        }

        let message = match &event.payload {
            EventPayload::Text { text } => reply::format_text(text).to_string(),
            EventPayload::Image { content_id } => match self.classify_content(content_id).await {
                Ok(result) => {
                    info!(
                        label = %result.label,
                        confidence = result.confidence,
                        "image classified"
                    );
                    reply::format_classification(&result, self.confidence_threshold)
                }
                Err(e) => {
                    error!(error = %e, content_id = %content_id, "image processing failed");
                    reply::APOLOGY.to_string()
                }
            },
            EventPayload::Other { kind } => {
                debug!(kind = %kind, "unsupported event ignored");
                return Handled::Skipped(SkipReason::Unsupported);
            }
        };

        Handled::Replied(
            deliver(
                self.client.as_ref(),
                event.reply_token.as_deref(),
                event.source_user_id.as_deref(),
                &message,
            )
            .await,
        )
    }

    async fn classify_content(&self, content_id: &str) -> Result<ClassificationResult, ImageError> {
        let bytes = self
            .client
            .fetch_content(content_id, self.max_content_bytes)
            .await?;
        let classifier = Arc::clone(&self.classifier);
        let result = tokio::task::spawn_blocking(move || classifier.classify(&bytes)).await??;
        Ok(result)
    }
}
