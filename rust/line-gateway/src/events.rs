/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Webhook payload parsing into typed [`InboundEvent`]s.

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(rename = "type", default)]
    kind: String,
    reply_token: Option<String>,
    source: Option<RawSource>,
    message: Option<RawMessage>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    user_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: String,
    id: Option<String>,
    text: Option<String>,
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Text { text: String },
    Image { content_id: String },
    /// Anything else: non-message events and unsupported message types.
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub reply_token: Option<String>,
    pub source_user_id: Option<String>,
    pub payload: EventPayload,
}

impl From<RawEvent> for InboundEvent {
    fn from(raw: RawEvent) -> Self {
        let payload = match (raw.kind.as_str(), raw.message) {
            ("message", Some(msg)) => match (msg.kind.as_str(), msg.id, msg.text) {
                ("text", _, Some(text)) => EventPayload::Text { text },
                ("image", Some(content_id), _) => EventPayload::Image { content_id },
                (kind, _, _) => EventPayload::Other {
                    kind: format!("message/{kind}"),
                },
            },
            (kind, _) => EventPayload::Other {
                kind: kind.to_string(),
            },
        };
        InboundEvent {
            reply_token: raw.reply_token.filter(|t| !t.is_empty()),
            source_user_id: raw.source.and_then(|s| s.user_id),
            payload,
        }
    }
}

/// Parse a webhook body into events, in delivery order.
///
/// Unknown event and message types become `EventPayload::Other`; only a
/// body that is not a JSON object of the expected shape is an error.
///
/// # Errors
///
/// Returns the `serde_json` error for malformed JSON.
pub fn parse_events(body: &[u8]) -> Result<Vec<InboundEvent>, serde_json::Error> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    Ok(payload.events.into_iter().map(InboundEvent::from).collect())
}
