// src/config.rs
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::ingest::types::SourceConfig;
use crate::ingest::Filters;
use crate::notify::ParseMode;
use crate::scoring::KeywordConfig;

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHANNEL_ID: &str = "TELEGRAM_CHANNEL_ID";

const DEFAULT_BATCH_SIZE: usize = 4;
const DEFAULT_MAX_AGE_DAYS: u32 = 1000;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    /// "" or "ENV" means: read from TELEGRAM_BOT_TOKEN
    pub bot_token: String,
    /// "" or "ENV" means: read from TELEGRAM_CHANNEL_ID
    pub channel_id: String,
    pub parse_mode: ParseMode,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel_id: String::new(),
            parse_mode: ParseMode::MarkdownV2,
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delivery trigger, classic five-field cron.
    pub cron_spec: String,
    /// Re-ingestion trigger for long-running processes.
    pub ingest_cron_spec: String,
    pub batch_size: usize,
    /// Shuffle each selected batch before delivery.
    pub shuffle_batch: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron_spec: "* * * * *".to_string(),
            ingest_cron_spec: "0 * * * *".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            shuffle_batch: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data.db")
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub keywords: KeywordConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Serve Prometheus metrics here when set.
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            scheduler: SchedulerConfig::default(),
            filters: Filters::default(),
            keywords: KeywordConfig::default(),
            sources: Vec::new(),
            db_path: default_db_path(),
            metrics_addr: None,
        }
    }
}

/// Config path: $RELAY_CONFIG, else `config/relay.toml`.
pub fn config_path() -> PathBuf {
    env::var(ENV_CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s).context("parsing relay config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Replace zero/out-of-range values with their defaults.
    fn sanitize(&mut self) {
        if self.scheduler.batch_size == 0 {
            self.scheduler.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.filters.max_age_days == 0 {
            self.filters.max_age_days = DEFAULT_MAX_AGE_DAYS;
        }
        self.filters.min_score = if self.filters.min_score.is_finite() {
            self.filters.min_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        for src in &mut self.sources {
            src.weight = if src.weight.is_finite() {
                src.weight.clamp(0.0, 1.0)
            } else {
                1.0
            };
        }
    }

    /// Fill bot token and channel from the environment where the file leaves
    /// them blank (or says "ENV"), then require both.
    pub fn resolve_credentials(&mut self) -> Result<()> {
        resolve_from_env(&mut self.telegram.bot_token, ENV_BOT_TOKEN);
        resolve_from_env(&mut self.telegram.channel_id, ENV_CHANNEL_ID);
        if self.telegram.bot_token.is_empty() {
            bail!("telegram bot token missing (set telegram.bot_token or {ENV_BOT_TOKEN})");
        }
        if self.telegram.channel_id.is_empty() {
            bail!("telegram channel missing (set telegram.channel_id or {ENV_CHANNEL_ID})");
        }
        Ok(())
    }
}

fn resolve_from_env(value: &mut String, var: &str) {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("env") {
        *value = env::var(var).unwrap_or_default().trim().to_string();
    } else if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}
