/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

use tracing::{info, warn};

use crate::line_client::{LineApiError, MessagingClient};

/// LINE rejects text messages longer than this many characters.
pub const MAX_TEXT_CHARS: usize = 5000;

const TRUNCATION_MARKER: &str = "\n\n[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Replied,
    Pushed,
    Failed,
}

/// Deliver `text`, by reply token when there is one, else (or when the
/// reply fails) by push to `user_id`.
///
/// Never returns an error: failures are logged and reported as
/// `DeliveryOutcome::Failed`.
pub async fn deliver(
    client: &dyn MessagingClient,
    reply_token: Option<&str>,
    user_id: Option<&str>,
    text: &str,
) -> DeliveryOutcome {
    let text = truncate_for_line(text);

    if let Some(token) = reply_token {
        match client.reply(token, &text).await {
            Ok(()) => return DeliveryOutcome::Replied,
            Err(LineApiError::ReplyTokenExpired) => {
                info!("reply token expired, falling back to push");
            }
            Err(e) => {
                warn!(error = %e, "reply failed, falling back to push");
            }
        }
    }

    let Some(user_id) = user_id else {
        warn!("no reply token or user id, message dropped");
        return DeliveryOutcome::Failed;
    };
    match client.push(user_id, &text).await {
        Ok(()) => {
            info!(user_id, "delivered by push");
            DeliveryOutcome::Pushed
        }
        Err(e) => {
            warn!(error = %e, user_id, "push failed");
            DeliveryOutcome::Failed
        }
    }
}

/// Cut `text` to [`MAX_TEXT_CHARS`] characters, marker included.
#[must_use]
pub fn truncate_for_line(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text.to_string();
    }
    let keep = MAX_TEXT_CHARS - TRUNCATION_MARKER.chars().count();
    let boundary = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(i, _)| i);
    format!("{}{TRUNCATION_MARKER}", &text[..boundary])
}
