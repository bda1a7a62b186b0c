use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::access::AccessList;
use crate::format::{FormatOptions, Symbols, DEFAULT_CHUNK_LEN};

/// Telegram rejects messages over 4096 characters. A multi-part reply puts
/// a `Part i/N` header in front of each chunk, so leave room for it.
const MAX_CHUNK_LEN: usize = 4096 - 32;
const MIN_CHUNK_LEN: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("BOT_TOKEN is not set")]
    MissingToken,
    #[error("WHITELIST is not set or contains no user ids")]
    MissingWhitelist,
    #[error("WHITELIST entry '{0}' is not a numeric user id")]
    InvalidUserId(String),
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: usize,
        min: usize,
        max: usize,
    },
}

impl ConfigError {
    /// Instructions shown to the operator when a required variable is
    /// missing. `None` for errors that are not fixed by setting a variable.
    pub fn remediation(&self) -> Option<&'static [&'static str]> {
        match self {
            ConfigError::MissingToken => Some(&[
                "❌ Please set your BOT_TOKEN in the .env file!",
                "Get your bot token from @BotFather on Telegram",
                "Create a .env file with: BOT_TOKEN=your_token_here",
            ]),
            ConfigError::MissingWhitelist => Some(&[
                "❌ Please add user IDs to the WHITELIST in the .env file!",
                "You can get your user ID by messaging @userinfobot on Telegram",
                "Add to .env file: WHITELIST=123456789,987654321",
            ]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub access: AccessList,
    pub settings: Settings,
}

impl Config {
    /// Read `BOT_TOKEN` and `WHITELIST` from the process environment.
    pub fn from_env(settings: Settings) -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var("BOT_TOKEN").ok(),
            std::env::var("WHITELIST").ok(),
            settings,
        )
    }

    pub fn from_vars(
        bot_token: Option<String>,
        whitelist: Option<String>,
        settings: Settings,
    ) -> Result<Self, ConfigError> {
        let bot_token = bot_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let access = AccessList::new(parse_whitelist(whitelist.as_deref().unwrap_or(""))?);
        if access.is_empty() {
            return Err(ConfigError::MissingWhitelist);
        }

        Ok(Self {
            bot_token,
            access,
            settings,
        })
    }
}

/// Parse a comma-separated list of user ids. Blank entries are skipped.
pub fn parse_whitelist(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidUserId(entry.to_string()))
        })
        .collect()
}

/// Optional formatting settings, read from a TOML file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub symbols: Symbols,
    #[serde(default = "default_cite_expandable")]
    pub cite_expandable: bool,
    /// Byte limit for one chunk of a formatted reply.
    #[serde(default = "default_chunk_len")]
    pub max_chunk_len: usize,
    /// Character limit for one piece of a fallback reply.
    #[serde(default = "default_chunk_len")]
    pub fallback_chunk_len: usize,
}

fn default_cite_expandable() -> bool {
    true
}

fn default_chunk_len() -> usize {
    DEFAULT_CHUNK_LEN
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: Symbols::default(),
            cite_expandable: default_cite_expandable(),
            max_chunk_len: default_chunk_len(),
            fallback_chunk_len: default_chunk_len(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content).context("Failed to parse TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_chunk_len", self.max_chunk_len)?;
        check_range("fallback_chunk_len", self.fallback_chunk_len)
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            symbols: self.symbols.clone(),
            cite_expandable: self.cite_expandable,
            max_chunk_len: self.max_chunk_len,
        }
    }
}

fn check_range(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if (MIN_CHUNK_LEN..=MAX_CHUNK_LEN).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min: MIN_CHUNK_LEN,
            max: MAX_CHUNK_LEN,
        })
    }
}
