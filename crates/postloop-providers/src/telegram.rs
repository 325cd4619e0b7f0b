//! Telegram Bot API adapter: posts into a channel or chat the bot can write to.
//!
//! Credentials: `bot_token`, `chat_id`.

use std::time::Duration;

use async_trait::async_trait;
use postloop_core::{config::TelegramConfig, ContentItem, ProviderKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError,
    http::{build_client, check_status},
    provider::Provider,
    types::{Credentials, Receipt},
};

/// Telegram rejects photo captions above this length.
const CAPTION_MAX: usize = 1024;

pub struct TelegramProvider {
    client: reqwest::Client,
    api_base: String,
}

impl TelegramProvider {
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message_id: i64,
}

/// Choose the Bot API method and JSON body for `item`.
fn build_request(item: &ContentItem, chat_id: &str) -> Result<(&'static str, Value), ProviderError> {
    let text = item.text_for(ProviderKind::Telegram);

    if let Some(asset) = item.primary_asset() {
        let is_video = asset
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("video/"));
        let (method, field) = if is_video {
            ("sendVideo", "video")
        } else {
            ("sendPhoto", "photo")
        };
        let mut body = json!({ "chat_id": chat_id });
        body[field] = Value::String(asset.url.clone());
        if let Some(text) = text {
            body["caption"] = Value::String(text.chars().take(CAPTION_MAX).collect());
        }
        return Ok((method, body));
    }

    match text {
        Some(text) => Ok(("sendMessage", json!({ "chat_id": chat_id, "text": text }))),
        None => Err(ProviderError::NothingToPublish(format!(
            "post {} has no deliverable asset or text",
            item.id
        ))),
    }
}

#[async_trait]
impl Provider for TelegramProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Telegram
    }

    async fn publish(
        &self,
        item: &ContentItem,
        credentials: &Credentials,
    ) -> Result<Receipt, ProviderError> {
        let token = credentials.require("bot_token")?;
        let chat_id = credentials.require("chat_id")?;
        let (method, body) = build_request(item, chat_id)?;
        let url = format!("{}/bot{}/{}", self.api_base, token, method);

        debug!(post_id = %item.id, method, "publishing to Telegram");

        let resp = self.client.post(&url).json(&body).send().await?;
        let resp = check_status(resp, "telegram").await?;
        let api: ApiResponse = resp
            .json()
            .await
            .map_err(ProviderError::decode)?;

        if !api.ok {
            return Err(ProviderError::Rejected {
                status: 200,
                message: api.description.unwrap_or_else(|| "ok=false".to_string()),
            });
        }

        let mut receipt = Receipt::new(ProviderKind::Telegram);
        receipt.remote_id = api.result.map(|m| m.message_id.to_string());
        Ok(receipt)
    }
}
