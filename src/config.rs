use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Seconds in the provider's rolling quota window.
const QUOTA_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Bounds on the polling interval, from config or at runtime
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;
pub const MAX_POLL_INTERVAL_SECS: u64 = 1440 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub poll: PollConfig,
    pub tracking: TrackingConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health/command server port. Not started when unset.
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// REST endpoint of the live-fixtures API
    pub base_url: String,
    /// API key sent as `x-apisports-key`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Hard bound on a single fetch, retries included
    pub timeout_secs: u64,
    /// Bound on one HTTP attempt; must leave room for the retries
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// Daily request quota of the plan (free tier: 100, Pro: 7500)
    pub max_calls_per_day: u32,
    /// Look up goal events for a match about to be notified
    #[serde(default = "default_event_lookups")]
    pub event_lookups: bool,
    pub retry: RetryConfig,
}

fn default_attempt_timeout() -> u64 {
    6
}

fn default_event_lookups() -> bool {
    true
}

impl ProviderConfig {
    /// Requests one cycle may spend: every fetch attempt plus the optional
    /// event lookup.
    pub fn calls_per_cycle(&self) -> u32 {
        self.retry.max_attempts.max(1) + u32::from(self.event_lookups)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per fetch, first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 4000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Requested delay between cycles
    pub interval_secs: u64,
}

/// What to do with a match first seen already at 1-0 / 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenLeadPolicy {
    /// Track it, with the goal minute pinned to the current minute and the
    /// lowest reliability.
    Track,
    /// Ignore it until it can be deadlisted.
    Skip,
}

impl Default for UnseenLeadPolicy {
    fn default() -> Self {
        Self::Track
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Max match-minutes between the first goal and the equaliser
    pub window_minutes: u32,
    /// Subtracted from the minute at which a 0-0 -> lead change is observed
    pub goal_minute_correction: u32,
    /// Wall-clock grace for a leading match missing from the feed
    pub stale_grace_minutes: u32,
    /// Wall-clock grace for a scoreless match missing from the feed
    pub scoreless_grace_minutes: u32,
    /// Age after which non-notified deadlist entries absent from the feed are pruned
    pub deadlist_retention_hours: u32,
    #[serde(default)]
    pub unseen_lead_policy: UnseenLeadPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            goal_minute_correction: 1,
            stale_grace_minutes: 30,
            scoreless_grace_minutes: 180,
            deadlist_retention_hours: 24,
            unseen_lead_policy: UnseenLeadPolicy::Track,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the committed state generations
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api(),
        }
    }
}

impl TelegramConfig {
    /// Both token and destination are present
    pub fn is_configured(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.trim().is_empty()) && self.chat_id.is_some()
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for a daily rolling log file
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("provider.base_url", "https://v3.football.api-sports.io")?
            .set_default("provider.timeout_secs", 15)?
            .set_default("provider.attempt_timeout_secs", 6)?
            .set_default("provider.max_calls_per_day", 7500)?
            .set_default("provider.event_lookups", true)?
            .set_default("provider.retry.max_attempts", 2)?
            .set_default("provider.retry.base_delay_ms", 500)?
            .set_default("provider.retry.max_delay_ms", 4000)?
            .set_default("poll.interval_secs", 300)?
            .set_default("tracking.window_minutes", 10)?
            .set_default("tracking.goal_minute_correction", 1)?
            .set_default("tracking.stale_grace_minutes", 30)?
            .set_default("tracking.scoreless_grace_minutes", 180)?
            .set_default("tracking.deadlist_retention_hours", 24)?
            .set_default("tracking.unseen_lead_policy", "track")?
            .set_default("storage.state_dir", "data/state")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("GOALWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (GOALWATCH_PROVIDER__API_KEY, etc.)
            .add_source(
                Environment::with_prefix("GOALWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            // Bare variables used by the legacy deployment
            .set_override_option("provider.api_key", std::env::var("API_KEY").ok())?
            .set_override_option("telegram.bot_token", std::env::var("TELEGRAM_TOKEN").ok())?
            .set_override_option(
                "telegram.chat_id",
                std::env::var("CHAT_ID").ok().and_then(|v| v.trim().parse::<i64>().ok()),
            )?
            .set_override_option(
                "health_port",
                std::env::var("PORT")
                    .ok()
                    .and_then(|v| v.trim().parse::<u16>().ok())
                    .map(i64::from),
            )?;

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for tests and one-off CLI runs
    pub fn default_config(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider: ProviderConfig {
                base_url: "https://v3.football.api-sports.io".to_string(),
                api_key: None,
                timeout_secs: 15,
                attempt_timeout_secs: default_attempt_timeout(),
                max_calls_per_day: 7500,
                event_lookups: default_event_lookups(),
                retry: RetryConfig::default(),
            },
            poll: PollConfig { interval_secs: 300 },
            tracking: TrackingConfig::default(),
            storage: StorageConfig {
                state_dir: state_dir.into(),
            },
            telegram: TelegramConfig::default(),
            logging: LoggingConfig::default(),
            health_port: None,
        }
    }

    /// Smallest delay between cycles that keeps within the daily quota
    pub fn min_poll_interval(&self) -> Duration {
        min_interval_for_quota(self.provider.max_calls_per_day, self.provider.calls_per_cycle())
    }

    /// Requested interval raised to the quota floor
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs).max(self.min_poll_interval())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if url::Url::parse(&self.provider.base_url).is_err() {
            errors.push(format!("provider.base_url is not a URL: {}", self.provider.base_url));
        }

        if self.provider.timeout_secs == 0 {
            errors.push("provider.timeout_secs must be positive".to_string());
        }

        if self.provider.attempt_timeout_secs == 0 {
            errors.push("provider.attempt_timeout_secs must be positive".to_string());
        } else if self
            .provider
            .attempt_timeout_secs
            .saturating_mul(u64::from(self.provider.retry.max_attempts.max(1)))
            > self.provider.timeout_secs
        {
            errors.push(
                "provider.attempt_timeout_secs * retry.max_attempts exceeds timeout_secs"
                    .to_string(),
            );
        }

        if self.provider.max_calls_per_day == 0 {
            errors.push("provider.max_calls_per_day must be positive".to_string());
        }

        if self.provider.retry.max_attempts == 0 {
            errors.push("provider.retry.max_attempts must be at least 1".to_string());
        }

        if self.provider.retry.base_delay_ms > self.provider.retry.max_delay_ms {
            errors.push("provider.retry.base_delay_ms exceeds max_delay_ms".to_string());
        }

        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll.interval_secs) {
            errors.push(format!(
                "poll.interval_secs must be between {} and {}",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS
            ));
        }

        if self.tracking.window_minutes == 0 {
            errors.push("tracking.window_minutes must be positive".to_string());
        } else if self.effective_poll_interval().as_secs()
            >= u64::from(self.tracking.window_minutes) * 60
        {
            // Consecutive polls would always be further apart than the window
            errors.push(format!(
                "effective poll interval of {}s (quota floor {}s) must be shorter than \
                 tracking.window_minutes ({} min)",
                self.effective_poll_interval().as_secs(),
                self.min_poll_interval().as_secs(),
                self.tracking.window_minutes
            ));
        }

        if self.tracking.stale_grace_minutes <= self.tracking.window_minutes {
            errors.push(
                "tracking.stale_grace_minutes should be greater than window_minutes".to_string(),
            );
        }

        if self.tracking.goal_minute_correction > self.tracking.window_minutes {
            errors.push(
                "tracking.goal_minute_correction should not exceed window_minutes".to_string(),
            );
        }

        if self.telegram.bot_token.is_some() != self.telegram.chat_id.is_some() {
            errors.push("telegram.bot_token and telegram.chat_id must be set together".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Spread `max_calls_per_day` evenly over 24h for cycles costing up to
/// `calls_per_cycle` requests each, rounding the delay up.
pub fn min_interval_for_quota(max_calls_per_day: u32, calls_per_cycle: u32) -> Duration {
    let calls = u64::from(max_calls_per_day.max(1));
    let per_cycle = u64::from(calls_per_cycle.max(1));
    Duration::from_secs((QUOTA_WINDOW_SECS * per_cycle).div_ceil(calls))
}
