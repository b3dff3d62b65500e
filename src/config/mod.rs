//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "nutrisync";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 512;
const DEFAULT_VOLATILE_PATHS: [&str; 4] = ["/search", "/callback", "/statistics", "/unread_count"];
const DEFAULT_TICK_SECS: u64 = 60;
const DEFAULT_FOCUS_DEBOUNCE_MS: u64 = 300;

/// Command-line arguments for the nutrisync binary.
#[derive(Debug, Parser)]
#[command(
    name = "nutrisync",
    version,
    about = "Nutrition tracker sync agent: meal reminders and quick widget actions"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "NUTRISYNC_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the API bearer token.
    #[arg(long = "api-token", env = "NUTRISYNC_API_TOKEN", value_name = "TOKEN", global = true)]
    pub api_token: Option<String>,

    /// Override the per-request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS", global = true)]
    pub api_timeout_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the meal reminder scheduler until interrupted.
    Remind(RemindArgs),
    /// Log or remove water intake.
    Water(WaterArgs),
    /// Start or end a fast.
    Fasting(FastingArgs),
    /// Print the daily nutrition summary.
    Summary(SummaryArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RemindArgs {
    /// Override the scheduler tick interval.
    #[arg(long = "tick-seconds", value_name = "SECONDS")]
    pub tick_seconds: Option<u64>,

    /// Toggle the reminder sound.
    #[arg(
        long = "sound",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub sound: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct WaterArgs {
    #[command(subcommand)]
    pub command: WaterCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum WaterCommand {
    /// Add water to the day's total.
    Add(WaterAmountArgs),
    /// Remove water from the day's total (never below zero).
    Remove(WaterAmountArgs),
}

#[derive(Debug, Args, Clone)]
pub struct WaterAmountArgs {
    /// Amount in millilitres.
    #[arg(long = "ml", value_name = "ML", default_value_t = 250)]
    pub ml: u32,

    /// Day to change; defaults to today.
    #[arg(long = "date", value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Args, Clone)]
pub struct FastingArgs {
    #[command(subcommand)]
    pub command: FastingCommand,
}

#[derive(Debug, Subcommand, Clone, Copy)]
pub enum FastingCommand {
    Start,
    End,
    Status,
}

#[derive(Debug, Args, Clone)]
pub struct SummaryArgs {
    /// Day to summarise; defaults to today.
    #[arg(long = "date", value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub reminders: SchedulerSettings,
    pub refresh: RefreshSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub volatile_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub sound: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub focus_debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("NUTRISYNC").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_global_overrides(&cli.overrides);
    if let Command::Remind(args) = &cli.command {
        raw.apply_remind_overrides(args);
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    cache: RawCacheSettings,
    reminders: RawSchedulerSettings,
    refresh: RawRefreshSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(token) = overrides.api_token.as_ref() {
            self.api.token = Some(token.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_remind_overrides(&mut self, overrides: &RemindArgs) {
        if let Some(seconds) = overrides.tick_seconds {
            self.reminders.tick_seconds = Some(seconds);
        }
        if let Some(sound) = overrides.sound {
            self.reminders.sound = Some(sound);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            cache,
            reminders,
            refresh,
            logging,
        } = raw;

        Ok(Self {
            api: build_api_settings(api)?,
            cache: build_cache_settings(cache)?,
            reminders: build_scheduler_settings(reminders)?,
            refresh: build_refresh_settings(refresh),
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid("api.base_url", "must not be empty"));
    }
    let base_url = Url::parse(trimmed)
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            format!("unsupported scheme `{}`", base_url.scheme()),
        ));
    }

    let token = api.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ApiSettings {
        base_url,
        token,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let max_entries = NonZeroUsize::new(cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES))
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

    let volatile_paths = cache
        .volatile_paths
        .unwrap_or_else(|| {
            DEFAULT_VOLATILE_PATHS
                .iter()
                .map(|path| (*path).to_string())
                .collect()
        })
        .into_iter()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect();

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl: Duration::from_secs(ttl_secs),
        max_entries,
        volatile_paths,
    })
}

fn build_scheduler_settings(
    reminders: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let tick_seconds = reminders.tick_seconds.unwrap_or(DEFAULT_TICK_SECS);
    if tick_seconds == 0 {
        return Err(LoadError::invalid(
            "reminders.tick_seconds",
            "must be greater than zero",
        ));
    }

    Ok(SchedulerSettings {
        tick: Duration::from_secs(tick_seconds),
        sound: reminders.sound.unwrap_or(true),
    })
}

fn build_refresh_settings(refresh: RawRefreshSettings) -> RefreshSettings {
    RefreshSettings {
        focus_debounce: Duration::from_millis(
            refresh
                .focus_debounce_ms
                .unwrap_or(DEFAULT_FOCUS_DEBOUNCE_MS),
        ),
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    token: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    max_entries: Option<usize>,
    volatile_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    tick_seconds: Option<u64>,
    sound: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRefreshSettings {
    focus_debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}
