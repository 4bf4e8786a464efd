//! Discord REST client: publishes preview replies and deletes them again.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};

use crate::store::ReplyHandle;
use crate::sync::{DeleteOutcome, MessageView, PostMetadata, ReplyPublisher};

const DISCORD_API: &str = "https://discord.com/api/v10";

const FOOTER_TEXT: &str = "Instagram embeds on Discord are broken, but I'll see what I can do.";
const FOOTER_ICON: &str =
    "https://www.instagram.com/static/images/ico/favicon-192.png/68d99ba29cc8.png";

pub struct DiscordRest {
    client: reqwest::Client,
    bot_token: String,
    api_base: String,
}

impl DiscordRest {
    pub fn new(bot_token: &str) -> Self {
        Self::with_api_base(bot_token, DISCORD_API)
    }

    /// Point the client at a different API root (tests).
    pub fn with_api_base(bot_token: &str, api_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    fn messages_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{channel_id}/messages", self.api_base)
    }

    /// The bot's own account, as a connectivity and credential probe.
    pub async fn current_user(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", self.auth())
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Discord credential check failed ({status})");
        }

        let me: Value = resp.json().await?;
        Ok(me
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string())
    }

    async fn handle_from_response(
        &self,
        resp: reqwest::Response,
        channel_id: &str,
        what: &str,
    ) -> anyhow::Result<ReplyHandle> {
        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
            anyhow::bail!("Discord {what} failed ({status}): {err}");
        }

        let message: Value = resp.json().await?;
        let message_id = message
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("Discord {what} response carries no message id"))?;
        Ok(ReplyHandle {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
        })
    }
}

/// Replies reference the source message without pinging its author.
fn reply_scaffold(reply_to: &MessageView) -> Value {
    json!({
        "message_reference": {"message_id": reply_to.id},
        "allowed_mentions": {"replied_user": false}
    })
}

#[async_trait]
impl ReplyPublisher for DiscordRest {
    async fn publish_embed(
        &self,
        link: &str,
        metadata: &PostMetadata,
        reply_to: &MessageView,
    ) -> anyhow::Result<ReplyHandle> {
        let mut body = reply_scaffold(reply_to);
        body["embeds"] = json!([{
            "url": link,
            "title": metadata.display_author(),
            "description": metadata.caption,
            "image": {"url": metadata.thumbnail_url},
            "fields": [{"name": "Likes:", "value": metadata.like_count.to_string()}],
            "footer": {"text": FOOTER_TEXT, "icon_url": FOOTER_ICON}
        }]);

        let resp = self
            .client
            .post(self.messages_url(&reply_to.channel_id))
            .header("Authorization", self.auth())
            .json(&body)
            .send()
            .await?;

        self.handle_from_response(resp, &reply_to.channel_id, "embed reply")
            .await
    }

    async fn publish_attachment(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        caption: &str,
        reply_to: &MessageView,
    ) -> anyhow::Result<ReplyHandle> {
        let mut payload = reply_scaffold(reply_to);
        payload["content"] = json!(caption);
        payload["attachments"] = json!([{"id": 0, "filename": filename}]);

        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part(
                "files[0]",
                Part::bytes(bytes).file_name(filename.to_string()),
            );

        let resp = self
            .client
            .post(self.messages_url(&reply_to.channel_id))
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .await?;

        self.handle_from_response(resp, &reply_to.channel_id, "attachment reply")
            .await
    }

    async fn delete_reply(&self, reply: &ReplyHandle) -> anyhow::Result<DeleteOutcome> {
        let resp = self
            .client
            .delete(format!(
                "{}/channels/{}/messages/{}",
                self.api_base, reply.channel_id, reply.message_id
            ))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        // Deleted platform-side already (moderator, user, another client).
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::AlreadyGone);
        }
        let err = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));
        anyhow::bail!("Discord delete message failed ({status}): {err}");
    }
}
