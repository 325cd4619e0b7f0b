//! Discord adapter built on channel webhooks, so no bot session is needed.
//!
//! Credentials: `webhook_url`.

use std::time::Duration;

use async_trait::async_trait;
use postloop_core::{ContentItem, ProviderKind};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError,
    http::{build_client, check_status},
    provider::Provider,
    types::{Credentials, Receipt},
};

const CONTENT_MAX: usize = 2000;

pub struct DiscordProvider {
    client: reqwest::Client,
}

impl DiscordProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    id: String,
    #[serde(default)]
    channel_id: Option<String>,
}

fn build_body(item: &ContentItem) -> Result<Value, ProviderError> {
    let content: Option<String> = item
        .text_for(ProviderKind::Discord)
        .map(|t| t.chars().take(CONTENT_MAX).collect());
    let image = item.primary_asset().map(|a| a.url.clone());

    if content.is_none() && image.is_none() {
        return Err(ProviderError::NothingToPublish(format!(
            "post {} has no deliverable asset or text",
            item.id
        )));
    }

    let mut body = json!({ "content": content.unwrap_or_default() });
    if let Some(url) = image {
        body["embeds"] = json!([{ "image": { "url": url } }]);
    }
    Ok(body)
}

#[async_trait]
impl Provider for DiscordProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Discord
    }

    async fn publish(
        &self,
        item: &ContentItem,
        credentials: &Credentials,
    ) -> Result<Receipt, ProviderError> {
        let webhook = credentials.require("webhook_url")?;
        let body = build_body(item)?;

        debug!(post_id = %item.id, "publishing to Discord webhook");

        // wait=true makes Discord return the created message instead of 204
        let resp = self
            .client
            .post(webhook)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await?;
        let message: WebhookMessage = check_status(resp, "discord")
            .await?
            .json()
            .await
            .map_err(ProviderError::decode)?;

        debug!(message_id = %message.id, channel_id = ?message.channel_id, "Discord message created");
        let mut receipt = Receipt::new(ProviderKind::Discord);
        receipt.remote_id = Some(message.id);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use postloop_core::MediaAsset;

    use super::*;

    #[test]
    fn image_goes_into_embed() {
        let item = ContentItem {
            id: "p".into(),
            user_id: "u".into(),
            caption: Some("look".into()),
            assets: vec![MediaAsset::new("https://x/cat.png")],
            texts: Default::default(),
            created_at: Utc::now(),
        };
        let body = build_body(&item).unwrap();
        assert_eq!(body["content"], "look");
        assert_eq!(body["embeds"][0]["image"]["url"], "https://x/cat.png");
    }

    #[test]
    fn empty_item_is_rejected() {
        let item = ContentItem {
            id: "p".into(),
            user_id: "u".into(),
            caption: None,
            assets: vec![],
            texts: Default::default(),
            created_at: Utc::now(),
        };
        assert!(matches!(build_body(&item), Err(ProviderError::NothingToPublish(_))));
    }

    #[tokio::test]
    async fn transport_error_does_not_expose_webhook_token() {
        let provider = DiscordProvider::new(Duration::from_secs(2));
        let credentials = Credentials::new()
            .with("webhook_url", "http://127.0.0.1:9/api/webhooks/42/HOOKSECRET");
        let item = ContentItem {
            id: "p".into(),
            user_id: "u".into(),
            caption: Some("hello".into()),
            assets: vec![MediaAsset::new("https://x/a.png")],
            texts: Default::default(),
            created_at: Utc::now(),
        };
        let err = provider.publish(&item, &credentials).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
        assert!(!err.to_string().contains("HOOKSECRET"), "{err}");
        assert!(!format!("{err:?}").contains("HOOKSECRET"));
    }
}
