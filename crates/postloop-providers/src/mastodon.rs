//! Mastodon adapter: uploads the first asset, then creates a status.
//!
//! Credentials: `instance_url`, `access_token`.

use std::time::Duration;

use async_trait::async_trait;
use postloop_core::{config::MastodonConfig, ContentItem, MediaAsset, ProviderKind};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::ProviderError,
    http::{build_client, check_status},
    provider::Provider,
    types::{Credentials, Receipt},
};

/// Default status length limit on stock Mastodon instances.
const STATUS_MAX: usize = 500;

pub struct MastodonProvider {
    client: reqwest::Client,
    visibility: String,
}

impl MastodonProvider {
    pub fn new(config: &MastodonConfig, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            visibility: config.visibility.clone(),
        }
    }

    /// Fetch the asset bytes and upload them as a media attachment.
    async fn upload_media(
        &self,
        instance: &str,
        token: &str,
        asset: &MediaAsset,
    ) -> Result<String, ProviderError> {
        let download = self.client.get(&asset.url).send().await?;
        let download = check_status(download, "mastodon-media-fetch").await?;
        let mime = asset
            .mime_type
            .clone()
            .or_else(|| {
                download
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = download.bytes().await?;

        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name(&asset.url))
            .mime_str(&mime)?;
        let mut form = Form::new().part("file", part);
        if let Some(alt) = asset.alt_text.clone() {
            form = form.text("description", alt);
        }

        let resp = self
            .client
            .post(format!("{instance}/api/v2/media"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let media: MediaResponse = check_status(resp, "mastodon")
            .await?
            .json()
            .await
            .map_err(ProviderError::decode)?;
        Ok(media.id)
    }
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

/// Last path segment of `url`, used as the upload file name.
fn file_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("upload")
        .to_string()
}

fn status_text(item: &ContentItem) -> String {
    item.text_for(ProviderKind::Mastodon)
        .unwrap_or_default()
        .chars()
        .take(STATUS_MAX)
        .collect()
}

#[async_trait]
impl Provider for MastodonProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mastodon
    }

    async fn publish(
        &self,
        item: &ContentItem,
        credentials: &Credentials,
    ) -> Result<Receipt, ProviderError> {
        let instance = credentials.require("instance_url")?.trim_end_matches('/');
        let token = credentials.require("access_token")?;
        let status = status_text(item);

        let mut fields: Vec<(&str, String)> = vec![("visibility", self.visibility.clone())];
        if let Some(asset) = item.primary_asset() {
            let media_id = self.upload_media(instance, token, asset).await?;
            fields.push(("media_ids[]", media_id));
        } else if status.trim().is_empty() {
            return Err(ProviderError::NothingToPublish(format!(
                "post {} has no deliverable asset or text",
                item.id
            )));
        }
        if !status.is_empty() {
            fields.push(("status", status));
        }

        debug!(post_id = %item.id, instance, "publishing Mastodon status");

        let resp = self
            .client
            .post(format!("{instance}/api/v1/statuses"))
            .bearer_auth(token)
            .form(&fields)
            .send()
            .await?;
        let created: StatusResponse = check_status(resp, "mastodon")
            .await?
            .json()
            .await
            .map_err(ProviderError::decode)?;

        Ok(Receipt {
            provider: ProviderKind::Mastodon,
            remote_id: Some(created.id),
            url: created.url,
        })
    }
}
