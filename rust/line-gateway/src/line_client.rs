/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! LINE Messaging API client: content download, reply and push.

use std::time::Duration;

use reqwest::StatusCode;
use xraybot_config::LineConfig;

/// Errors from the LINE Messaging API.
#[derive(thiserror::Error, Debug)]
pub enum LineApiError {
    #[error("reply token is invalid or already used")]
    ReplyTokenExpired,
    #[error("LINE API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("LINE API transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("content exceeds {limit} bytes")]
    ContentTooLarge { limit: usize },
}

/// Outbound side of the messaging platform.
#[async_trait::async_trait]
pub trait MessagingClient: Send + Sync {
    /// Download the binary content of message `content_id`, refusing
    /// anything larger than `max_bytes`.
    async fn fetch_content(&self, content_id: &str, max_bytes: usize)
        -> Result<Vec<u8>, LineApiError>;

    /// Answer through a single-use reply token.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), LineApiError>;

    /// Send to a user id without a token.
    async fn push(&self, user_id: &str, text: &str) -> Result<(), LineApiError>;
}

pub struct LineClient {
    http: reqwest::Client,
    api_base: String,
    data_api_base: String,
    access_token: String,
}

impl LineClient {
    /// # Errors
    ///
    /// Returns `LineApiError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &LineConfig, access_token: String) -> Result<Self, LineApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            data_api_base: config.data_api_base.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    async fn post_message(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<reqwest::Response, LineApiError> {
        Ok(self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?)
    }
}

fn text_messages(text: &str) -> serde_json::Value {
    serde_json::json!([{ "type": "text", "text": text }])
}

/// Turn a non-2xx response into an `Api` error using LINE's
/// `{"message": ...}` body when present.
async fn api_error(resp: reqwest::Response) -> LineApiError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or(body);
    LineApiError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait::async_trait]
impl MessagingClient for LineClient {
    async fn fetch_content(
        &self,
        content_id: &str,
        max_bytes: usize,
    ) -> Result<Vec<u8>, LineApiError> {
        let url = format!(
            "{}/v2/bot/message/{content_id}/content",
            self.data_api_base
        );
        let mut resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        if resp
            .content_length()
            .is_some_and(|len| usize::try_from(len).map_or(true, |len| len > max_bytes))
        {
            return Err(LineApiError::ContentTooLarge { limit: max_bytes });
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if body.len() + chunk.len() > max_bytes {
                return Err(LineApiError::ContentTooLarge { limit: max_bytes });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), LineApiError> {
        let payload = serde_json::json!({
            "replyToken": reply_token,
            "messages": text_messages(text),
        });
        let resp = self.post_message("/v2/bot/message/reply", &payload).await?;
        if resp.status().is_success() {
            return Ok(());
        }
        match api_error(resp).await {
            LineApiError::Api { status, message }
                if status == StatusCode::BAD_REQUEST.as_u16()
                    && message.contains("Invalid reply token") =>
            {
                Err(LineApiError::ReplyTokenExpired)
            }
            other => Err(other),
        }
    }

    async fn push(&self, user_id: &str, text: &str) -> Result<(), LineApiError> {
        let payload = serde_json::json!({
            "to": user_id,
            "messages": text_messages(text),
        });
        let resp = self.post_message("/v2/bot/message/push", &payload).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(api_error(resp).await)
        }
    }
}
