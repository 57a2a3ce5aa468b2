use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment-driven daemon configuration. `.env` is loaded before this in
/// main, so plain env vars and dotenv entries behave the same.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    /// Reply-generation webhook. When unset the bot surface is disabled and
    /// bot sends answer with a `BotUpstreamFailed`.
    pub bot_webhook_url: Option<String>,
    pub bot_reply_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        let db_path = std::env::var("TIDELINE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Path::new(&home).join(".tideline").join("tideline.db"));

        let port = match std::env::var("TIDELINE_PORT") {
            Ok(raw) => raw.parse().context("invalid TIDELINE_PORT")?,
            Err(_) => 3000,
        };

        let bot_webhook_url = std::env::var("BOT_WEBHOOK_URL").ok();

        let timeout_secs: u64 = match std::env::var("BOT_REPLY_TIMEOUT_SECS") {
            Ok(raw) => raw.parse().context("invalid BOT_REPLY_TIMEOUT_SECS")?,
            Err(_) => 30,
        };

        Ok(Self {
            db_path,
            port,
            bot_webhook_url,
            bot_reply_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
