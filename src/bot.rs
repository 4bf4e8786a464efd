//! Composition root: builds the store and collaborators, then pumps gateway
//! events into the sync controller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::discord::{DiscordGateway, DiscordRest, GatewayEvent};
use crate::instagram::InstagramClient;
use crate::store::CorrelationStore;
use crate::sync::SyncController;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connect to Discord and run until ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let store = CorrelationStore::with_capacity(config.cache_capacity);
    let fetcher = Arc::new(InstagramClient::new(&config.instagram_session_id));
    let publisher = Arc::new(DiscordRest::new(&config.discord_token));
    let controller = Arc::new(SyncController::new(store, fetcher, publisher));

    let gateway = DiscordGateway::new(&config.discord_token, config.cache_capacity);
    let (tx, mut rx) = mpsc::channel::<GatewayEvent>(100);

    // One task per event: a slow metadata fetch for one message must not
    // stall previews for messages arriving after it. The store serializes
    // its own mutations.
    let consumer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                match event {
                    GatewayEvent::Created(message) => controller.message_created(&message).await,
                    GatewayEvent::Edited { before, after } => {
                        controller.message_edited(before.as_deref(), &after).await;
                    }
                    GatewayEvent::Deleted { message_id } => {
                        controller.message_deleted(&message_id).await;
                    }
                }
            });
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            outcome = gateway.listen(tx.clone()) => {
                match outcome {
                    Ok(()) => info!("Discord: gateway connection closed, reconnecting"),
                    Err(e) => warn!("Discord: gateway error: {e}, reconnecting"),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    drop(tx);
    let _ = consumer.await;
    Ok(())
}

/// Validate credentials without starting the event loop.
pub async fn doctor(config: Config) -> Result<()> {
    println!("config: ok (cache capacity {})", config.cache_capacity);

    let rest = DiscordRest::new(&config.discord_token);
    match rest.current_user().await {
        Ok(username) => println!("discord: ok (authenticated as {username})"),
        Err(e) => {
            println!("discord: failed ({e})");
            anyhow::bail!("Discord credential check failed");
        }
    }

    // The Instagram cookie can only be proven against a real post; presence
    // was already enforced by Config::validate.
    println!("instagram: session id present (not probed)");
    Ok(())
}
