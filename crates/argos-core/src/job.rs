use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SiteConfig;

/// Status of a scheduler job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Abandoned on shutdown after the grace period.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// What a finished job produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub urls_scraped: usize,
    pub items_extracted: usize,
    pub errors_encountered: usize,
    pub new_content_found: bool,
    pub content_hash: Option<String>,
}

/// One scheduler-initiated execution against one site registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub site_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub logs: Vec<String>,
    pub results: Option<JobSummary>,
}

impl Job {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id: site_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            errors: Vec::new(),
            logs: Vec::new(),
            results: None,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(format!("{} {}", Utc::now().to_rfc3339(), line.into()));
    }
}

/// Per-site notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    pub on_new_content: bool,
    pub on_error: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            on_new_content: true,
            on_error: false,
        }
    }
}

/// A site configuration plus the scheduler's mutable bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRegistration {
    pub site: SiteConfig,
    /// URLs to scrape on each run; the site root when empty.
    #[serde(default)]
    pub target_urls: Vec<String>,
    #[serde(default = "default_interval_days")]
    pub check_interval_days: u32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub notifications: NotificationPreferences,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub last_content_hash: Option<String>,
}

fn default_interval_days() -> u32 {
    1
}

impl SiteRegistration {
    pub fn new(site: SiteConfig) -> Self {
        Self {
            site,
            target_urls: Vec::new(),
            check_interval_days: default_interval_days(),
            priority: 0,
            notifications: NotificationPreferences::default(),
            last_checked_at: None,
            next_check_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            total_runs: 0,
            last_content_hash: None,
        }
    }

    pub fn with_target_urls(mut self, urls: Vec<String>) -> Self {
        self.target_urls = urls;
        self
    }

    pub fn with_interval_days(mut self, days: u32) -> Self {
        self.check_interval_days = days;
        self
    }

    pub fn id(&self) -> &str {
        &self.site.id
    }

    /// Enabled and never checked, or past its next-due time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.site.enabled && self.next_check_at.is_none_or(|due| due <= now)
    }

    pub fn urls(&self) -> Vec<String> {
        if self.target_urls.is_empty() {
            vec![format!("https://{}/", self.site.domain)]
        } else {
            self.target_urls.clone()
        }
    }

    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.total_runs += 1;
        self.last_checked_at = Some(now);
    }

    /// Failure count never stretches the interval; every run reschedules
    /// at `now + check_interval_days`.
    pub fn mark_finished(&mut self, now: DateTime<Utc>, success: bool) {
        if success {
            self.consecutive_failures = 0;
            self.last_success_at = Some(now);
        } else {
            self.consecutive_failures += 1;
        }
        self.next_check_at = Some(now + TimeDelta::days(i64::from(self.check_interval_days)));
    }
}

/// The bookkeeping fields a scheduler run owns on a registration.
///
/// Stores apply these onto their current copy so operator edits made while
/// a job runs (enable flag, targets, interval) survive the write back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleUpdate {
    pub total_runs: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_content_hash: Option<String>,
}

impl From<&SiteRegistration> for ScheduleUpdate {
    fn from(registration: &SiteRegistration) -> Self {
        Self {
            total_runs: registration.total_runs,
            last_checked_at: registration.last_checked_at,
            next_check_at: registration.next_check_at,
            last_success_at: registration.last_success_at,
            consecutive_failures: registration.consecutive_failures,
            last_content_hash: registration.last_content_hash.clone(),
        }
    }
}

impl ScheduleUpdate {
    pub fn apply_to(&self, registration: &mut SiteRegistration) {
        registration.total_runs = self.total_runs;
        registration.last_checked_at = self.last_checked_at;
        registration.next_check_at = self.next_check_at;
        registration.last_success_at = self.last_success_at;
        registration.consecutive_failures = self.consecutive_failures;
        registration.last_content_hash = self.last_content_hash.clone();
    }
}

/// Configuration for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub max_concurrent_jobs: usize,
    /// Watchdog deadline for one job; `None` disables it.
    pub job_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    /// Terminal jobs kept for status reporting.
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            max_concurrent_jobs: 3,
            job_timeout: Some(Duration::from_secs(600)),
            shutdown_grace: Duration::from_secs(30),
            history_limit: 50,
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
