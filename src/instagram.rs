//! Instagram metadata fetcher.
//!
//! Scrapes the JSON representation of a post using an authenticated session
//! cookie and a browser user-agent, and reduces it to the six fields the
//! rest of the bot cares about.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::sync::{MetadataFetcher, PostMetadata};

/// Instagram serves the scraping-hostile empty page to unknown clients; a
/// browser user-agent plus a logged-in `sessionid` cookie gets the JSON.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/93.0.4577.63 Safari/537.36";

/// Query string that makes a post URL return its JSON document.
const JSON_QUERY: &str = "__a=1&__d=dis";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to `{url}` failed: {reason}")]
    Request { url: String, reason: String },
    #[error("`{url}` answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("response from `{url}` is not valid JSON: {reason}")]
    Decode { url: String, reason: String },
    #[error("post document from `{url}` is missing `{field}`")]
    MissingField { url: String, field: &'static str },
}

pub struct InstagramClient {
    client: reqwest::Client,
    session_id: String,
}

impl InstagramClient {
    pub fn new(session_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            session_id: session_id.to_string(),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header("user-agent", USER_AGENT)
            .header("cookie", format!("sessionid={};", self.session_id))
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn fetch_post(&self, link: &str) -> Result<PostMetadata, FetchError> {
        let url = format!("{link}?{JSON_QUERY}");
        let response = self.get(&url).await?;
        let payload: Value = response.json().await.map_err(|e| FetchError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        parse_post_metadata(&url, &payload)
    }
}

/// Reduce a post JSON document to `PostMetadata`.
///
/// Only the thumbnail is hard-required (the preview is pointless without an
/// image); every other field degrades to its absent form.
fn parse_post_metadata(url: &str, payload: &Value) -> Result<PostMetadata, FetchError> {
    let media = payload
        .pointer("/graphql/shortcode_media")
        .ok_or(FetchError::MissingField {
            url: url.to_string(),
            field: "graphql.shortcode_media",
        })?;

    let thumbnail_url = media
        .get("display_url")
        .and_then(Value::as_str)
        .ok_or(FetchError::MissingField {
            url: url.to_string(),
            field: "display_url",
        })?
        .to_string();

    Ok(PostMetadata {
        thumbnail_url,
        title: str_or_empty(media.get("accessibility_caption")),
        author_name: str_or_empty(media.pointer("/owner/full_name")),
        username: str_or_empty(media.pointer("/owner/username")),
        caption: str_or_empty(media.pointer("/edge_media_to_caption/edges/0/node/text")),
        like_count: media
            .pointer("/edge_media_preview_like/count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

fn str_or_empty(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .unwrap_or_default()
}

#[async_trait]
impl MetadataFetcher for InstagramClient {
    async fn fetch(&self, link: &str) -> anyhow::Result<PostMetadata> {
        Ok(self.fetch_post(link).await?)
    }

    async fn fetch_thumbnail(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}
