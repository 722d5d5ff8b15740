use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use argos_core::cache::CacheStats;
use argos_core::models::{Extractor, Instruction, SiteConfig};
use argos_core::result::{ScrapeOptions, ScrapeResult};
use argos_core::scheduler::{SchedulerStatus, StopReport};

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    /// Replaces the matching site's instructions for this call.
    #[serde(default, alias = "actions")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub instructions: Option<Vec<Instruction>>,
    /// Replaces the matching site's extractors for this call.
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub extractors: Option<Vec<Extractor>>,
    #[serde(default)]
    pub options: ScrapeOptionsBody,
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptionsBody {
    pub use_cache: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub screenshot: Option<bool>,
    pub include_frames: Option<bool>,
    pub timeout_ms: Option<u64>,
}

impl From<ScrapeOptionsBody> for ScrapeOptions {
    fn from(body: ScrapeOptionsBody) -> Self {
        let defaults = ScrapeOptions::default();
        Self {
            use_cache: body.use_cache.unwrap_or(defaults.use_cache),
            cache_ttl_secs: body.cache_ttl_secs,
            screenshot: body.screenshot.unwrap_or(defaults.screenshot),
            include_frames: body.include_frames.unwrap_or(defaults.include_frames),
            timeout_ms: body.timeout_ms,
        }
    }
}

impl From<ScrapeRequest> for argos_core::result::ScrapeRequest {
    fn from(body: ScrapeRequest) -> Self {
        Self {
            url: body.url,
            instructions: body.instructions,
            extractors: body.extractors,
            options: body.options.into(),
        }
    }
}

/// Failed scrapes are still 200 responses with `success: false`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    pub url: String,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<ScrapeResult> for ScrapeResponse {
    fn from(result: ScrapeResult) -> Self {
        Self {
            success: result.success,
            url: result.url,
            data: serde_json::Value::Object(result.data),
            metadata: serde_json::to_value(&result.metadata).unwrap_or_default(),
            errors: result.errors,
            error_kind: result.error_kind,
            timestamp: result.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub default_ttl_secs: u64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entries,
            hits: stats.hits,
            misses: stats.misses,
            default_ttl_secs: stats.default_ttl_secs,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ClearCacheQuery {
    /// Invalidate only this URL instead of the whole cache.
    pub url: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStartResponse {
    /// False when the scheduler was already running.
    pub started: bool,
    pub running: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStopResponse {
    pub was_running: bool,
    pub drained: usize,
    pub abandoned: usize,
}

impl From<StopReport> for SchedulerStopResponse {
    fn from(report: StopReport) -> Self {
        Self {
            was_running: report.was_running,
            drained: report.drained,
            abandoned: report.abandoned,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatusResponse {
    pub running: bool,
    #[schema(value_type = Vec<Object>)]
    pub running_jobs: Vec<argos_core::job::Job>,
    #[schema(value_type = Vec<Object>)]
    pub recent_jobs: Vec<argos_core::job::Job>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
    pub interval_secs: u64,
    pub max_concurrent_jobs: usize,
}

impl From<SchedulerStatus> for SchedulerStatusResponse {
    fn from(status: SchedulerStatus) -> Self {
        Self {
            running: status.running,
            running_jobs: status.running_jobs,
            recent_jobs: status.recent_jobs,
            last_tick_at: status.last_tick_at,
            next_tick_at: status.next_tick_at,
            interval_secs: status.interval_secs,
            max_concurrent_jobs: status.max_concurrent_jobs,
        }
    }
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub enabled: bool,
    pub version: String,
    pub instruction_count: usize,
    pub extractor_count: usize,
}

impl From<SiteConfig> for SiteSummary {
    fn from(site: SiteConfig) -> Self {
        Self {
            instruction_count: site.instructions.len(),
            extractor_count: site.extractors.len(),
            id: site.id,
            name: site.name,
            domain: site.domain,
            enabled: site.enabled,
            version: site.version,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SiteListResponse {
    pub sites: Vec<SiteSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReloadResponse {
    pub loaded: usize,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub scheduler_running: bool,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
