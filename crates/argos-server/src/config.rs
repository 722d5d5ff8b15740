use std::str::FromStr;
use std::time::Duration;

use argos_client::EngineKind;
use argos_core::result::DEFAULT_CACHE_TTL;
use argos_core::{AppError, ScrapeServiceConfig};
use argos_core::job::SchedulerConfig;
use argos_store::StoreConfig;

/// Everything the server binary reads from its environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub cache_ttl: Duration,
    pub politeness_jitter: Duration,
    pub scheduler: SchedulerConfig,
    pub scheduler_autostart: bool,
    pub engine: EngineKind,
    pub notify_webhook: Option<String>,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            rate_limit_per_minute: 10,
            cache_ttl: DEFAULT_CACHE_TTL,
            politeness_jitter: Duration::ZERO,
            scheduler: SchedulerConfig::default(),
            scheduler_autostart: false,
            engine: EngineKind::default(),
            notify_webhook: None,
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `ARGOS_SERVER_PORT` (default 3000)
    /// - `ARGOS_RATE_LIMIT_PER_MINUTE` (default 10, per client IP on `/scrape`)
    /// - `ARGOS_CACHE_TTL_SECS` (default 300), `ARGOS_POLITENESS_JITTER_MS` (default 0)
    /// - `ARGOS_SCHEDULER_INTERVAL_SECS`, `ARGOS_MAX_CONCURRENT_JOBS`,
    ///   `ARGOS_JOB_TIMEOUT_SECS` (0 disables the watchdog),
    ///   `ARGOS_SHUTDOWN_GRACE_SECS`, `ARGOS_SCHEDULER_AUTOSTART`
    /// - `ARGOS_ENGINE` (`browser` | `http`)
    /// - `ARGOS_NOTIFY_WEBHOOK`
    /// - plus everything [`StoreConfig::from_env`] reads
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let scheduler = defaults.scheduler;

        let rate_limit_per_minute = env_or("ARGOS_RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute)?;
        if rate_limit_per_minute == 0 {
            return Err(AppError::ConfigError(
                "ARGOS_RATE_LIMIT_PER_MINUTE must be at least 1".into(),
            ));
        }

        let max_jobs = env_or("ARGOS_MAX_CONCURRENT_JOBS", scheduler.max_concurrent_jobs)?;
        if max_jobs == 0 {
            return Err(AppError::ConfigError(
                "ARGOS_MAX_CONCURRENT_JOBS must be at least 1".into(),
            ));
        }

        let default_timeout = scheduler.job_timeout.map_or(0, |t| t.as_secs());
        let job_timeout = match env_or("ARGOS_JOB_TIMEOUT_SECS", default_timeout)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let interval = env_or("ARGOS_SCHEDULER_INTERVAL_SECS", scheduler.interval.as_secs())?;
        if interval == 0 {
            return Err(AppError::ConfigError(
                "ARGOS_SCHEDULER_INTERVAL_SECS must be at least 1".into(),
            ));
        }
        let grace = env_or("ARGOS_SHUTDOWN_GRACE_SECS", scheduler.shutdown_grace.as_secs())?;

        let engine = match std::env::var("ARGOS_ENGINE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.engine,
        };

        Ok(Self {
            port: env_or("ARGOS_SERVER_PORT", defaults.port)?,
            rate_limit_per_minute,
            cache_ttl: Duration::from_secs(env_or(
                "ARGOS_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )?),
            politeness_jitter: Duration::from_millis(env_or(
                "ARGOS_POLITENESS_JITTER_MS",
                defaults.politeness_jitter.as_millis() as u64,
            )?),
            scheduler: scheduler
                .with_interval(Duration::from_secs(interval))
                .with_max_concurrent_jobs(max_jobs)
                .with_job_timeout(job_timeout)
                .with_shutdown_grace(Duration::from_secs(grace)),
            scheduler_autostart: env_or("ARGOS_SCHEDULER_AUTOSTART", defaults.scheduler_autostart)?,
            engine,
            notify_webhook: std::env::var("ARGOS_NOTIFY_WEBHOOK")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            store: StoreConfig::from_env()?,
        })
    }
}

impl ServerConfig {
    /// Orchestrator settings, with screenshots under the data directory.
    pub fn scrape_service(&self) -> ScrapeServiceConfig {
        ScrapeServiceConfig::default()
            .with_default_cache_ttl(self.cache_ttl)
            .with_politeness_jitter(self.politeness_jitter)
            .with_screenshot_dir(self.store.screenshots_dir())
    }
}

/// Parse `var` if set, otherwise return `default`.
pub fn env_or<T>(var: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => parse_value(var, &raw),
    }
}

fn parse_value<T>(var: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AppError::ConfigError(format!("Invalid {var} '{raw}': {e}")))
}
