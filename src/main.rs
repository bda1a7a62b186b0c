mod access;
mod bot;
mod config;
mod format;
mod platform;
mod responder;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::{Config, Settings};
use crate::platform::telegram::TelegramReplier;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mdbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // BOT_TOKEN and WHITELIST may come from a .env file
    dotenvy::dotenv().ok();

    let settings = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            info!("Loading settings from: {}", path.display());
            Settings::load(&path)?
        }
        None => Settings::default(),
    };

    let config = match Config::from_env(settings) {
        Ok(config) => config,
        Err(e) => match e.remediation() {
            Some(lines) => {
                for line in lines {
                    println!("{}", line);
                }
                return Ok(());
            }
            None => return Err(e).context("Invalid configuration"),
        },
    };

    info!("Whitelisted users: {:?}", config.access.sorted_ids());

    let bot = Bot::new(&config.bot_token);
    let replier = Arc::new(TelegramReplier::new(bot.clone()));
    let state = Arc::new(AppState::new(&config, replier));

    info!("Starting Markdown Formatter Bot...");
    bot::run(bot, state).await?;

    Ok(())
}
