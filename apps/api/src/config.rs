use std::str::FromStr;

use anyhow::{Context, Result};

use crate::interview::ledger::LedgerConfig;

const DEFAULT_CONVERSATION_API_URL: &str = "https://tavusapi.com/v2";

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub conversation_api_url: String,
    pub conversation_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub ledger: LedgerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = LedgerConfig::default();

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
            conversation_api_url: std::env::var("CONVERSATION_API_URL")
                .unwrap_or_else(|_| DEFAULT_CONVERSATION_API_URL.to_string()),
            conversation_api_key: require_env("CONVERSATION_API_KEY")?,
            port: env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            ledger: LedgerConfig {
                min_start_balance_minutes: env_or(
                    "MIN_START_BALANCE_MINUTES",
                    defaults.min_start_balance_minutes,
                )?,
                critical_warning_seconds: env_or(
                    "CRITICAL_WARNING_SECONDS",
                    defaults.critical_warning_seconds,
                )?,
                low_warning_seconds: env_or("LOW_WARNING_SECONDS", defaults.low_warning_seconds)?,
                min_conversation_id_len: env_or(
                    "MIN_CONVERSATION_ID_LEN",
                    defaults.min_conversation_id_len,
                )?,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Parses `key` if set, otherwise returns `default`.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value: '{raw}'"))
}
