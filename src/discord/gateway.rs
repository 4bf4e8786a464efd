//! Discord gateway WebSocket listener.
//!
//! Connects, identifies, heartbeats, and reduces MESSAGE_CREATE /
//! MESSAGE_UPDATE / MESSAGE_DELETE dispatches to [`GatewayEvent`]s on an
//! mpsc channel. One connection per `listen` call; the caller reconnects.

use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use super::{GatewayEvent, RecentMessages};
use crate::sync::MessageView;

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = 1 | 512 | 32768;

const DISCORD_API: &str = "https://discord.com/api/v10";

pub struct DiscordGateway {
    bot_token: String,
    client: reqwest::Client,
    /// Only the `listen` loop touches the cache, but it survives reconnects.
    cache: Mutex<RecentMessages>,
}

impl DiscordGateway {
    pub fn new(bot_token: &str, cache_capacity: usize) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            client: reqwest::Client::new(),
            cache: Mutex::new(RecentMessages::with_capacity(cache_capacity)),
        }
    }

    /// Run one gateway connection until it closes, forwarding events to `tx`.
    pub async fn listen(&self, tx: tokio::sync::mpsc::Sender<GatewayEvent>) -> anyhow::Result<()> {
        // Get Gateway URL
        let gw_resp: Value = self
            .client
            .get(format!("{DISCORD_API}/gateway/bot"))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await?
            .json()
            .await?;

        let gw_url = gw_resp
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or("wss://gateway.discord.gg");

        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Read Hello (opcode 10)
        let hello = read.next().await.ok_or(anyhow::anyhow!("No hello"))??;
        let hello_data: Value = serde_json::from_str(&hello.to_string())?;
        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(41250);

        // Send Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": "linux",
                    "browser": "gramlens",
                    "device": "gramlens"
                }
            }
        });
        write.send(Message::Text(identify.to_string().into())).await?;

        tracing::info!("Discord: connected and identified");

        // Track the last sequence number for heartbeats.
        // Only accessed in the select! loop below, so a plain i64 suffices.
        let mut sequence: i64 = -1;
        let mut bot_user_id = String::new();

        // Spawn heartbeat timer — sends a tick signal, actual heartbeat
        // is assembled in the select! loop where `sequence` lives.
        let (hb_tx, mut hb_rx) = tokio::sync::mpsc::channel::<()>(1);
        let hb_interval = heartbeat_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(hb_interval));
            loop {
                interval.tick().await;
                if hb_tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = hb_rx.recv() => {
                    let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                    let hb = json!({"op": 1, "d": d});
                    if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                        break;
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(_))) | None => break,
                        _ => continue,
                    };

                    let event: Value = match serde_json::from_str(&msg) {
                        Ok(e) => e,
                        Err(_) => continue,
                    };

                    // Track sequence number from all dispatch events
                    if let Some(s) = event.get("s").and_then(Value::as_i64) {
                        sequence = s;
                    }

                    let op = event.get("op").and_then(Value::as_u64).unwrap_or(0);

                    match op {
                        // Op 1: Server requests an immediate heartbeat
                        1 => {
                            let d = if sequence >= 0 { json!(sequence) } else { json!(null) };
                            let hb = json!({"op": 1, "d": d});
                            if write.send(Message::Text(hb.to_string().into())).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        // Op 7: Reconnect
                        7 => {
                            tracing::warn!("Discord: received Reconnect (op 7), closing for restart");
                            break;
                        }
                        // Op 9: Invalid Session
                        9 => {
                            tracing::warn!("Discord: received Invalid Session (op 9), closing for restart");
                            break;
                        }
                        _ => {}
                    }

                    let event_type = event.get("t").and_then(|t| t.as_str()).unwrap_or("");
                    let Some(d) = event.get("d") else {
                        continue;
                    };

                    if event_type == "READY" {
                        bot_user_id = d
                            .pointer("/user/id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        let username = d.pointer("/user/username").and_then(Value::as_str).unwrap_or("?");
                        tracing::info!("Discord: ready as {username} ({bot_user_id})");
                        continue;
                    }

                    let gateway_event = {
                        let mut cache = self
                            .cache
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        dispatch_to_event(event_type, d, &bot_user_id, &mut cache)
                    };

                    if let Some(gateway_event) = gateway_event {
                        if tx.send(gateway_event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Reduce one dispatch payload to a [`GatewayEvent`], updating the content
/// cache along the way. `None` for dispatches the bot does not care about.
fn dispatch_to_event(
    event_type: &str,
    d: &Value,
    bot_user_id: &str,
    cache: &mut RecentMessages,
) -> Option<GatewayEvent> {
    match event_type {
        "MESSAGE_CREATE" => {
            let view = message_view(d, bot_user_id)?;
            if !view.from_self {
                cache.insert(&view.id, view.content.clone());
            }
            Some(GatewayEvent::Created(view))
        }
        "MESSAGE_UPDATE" => {
            let mut view = message_view(d, bot_user_id)?;
            // Partial updates (embed unfurls) omit `content`; fall back to
            // the cached text so the link diff sees no change.
            let before = match d.get("content").and_then(Value::as_str) {
                Some(content) => cache.insert(&view.id, content.to_string()),
                None => {
                    let cached = cache.get(&view.id).map(ToString::to_string);
                    view.content = cached.clone().unwrap_or_default();
                    cached
                }
            };
            Some(GatewayEvent::Edited { before, after: view })
        }
        "MESSAGE_DELETE" => {
            let message_id = d.get("id").and_then(Value::as_str)?.to_string();
            cache.remove(&message_id);
            Some(GatewayEvent::Deleted { message_id })
        }
        _ => None,
    }
}

fn message_view(d: &Value, bot_user_id: &str) -> Option<MessageView> {
    let id = d.get("id").and_then(Value::as_str)?.to_string();
    let channel_id = d.get("channel_id").and_then(Value::as_str)?.to_string();
    let author_id = d
        .pointer("/author/id")
        .and_then(Value::as_str)
        .unwrap_or("");
    let has_native_embed = d
        .get("embeds")
        .and_then(Value::as_array)
        .is_some_and(|embeds| !embeds.is_empty());

    Some(MessageView {
        id,
        channel_id,
        content: d
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        from_self: !bot_user_id.is_empty() && author_id == bot_user_id,
        has_native_embed,
    })
}
