use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{ExtractedData, Extractor, Instruction};

/// Default lifetime of a cached scrape result.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A one-off or scheduled scrape of a single URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    /// Replaces the site's instructions for this call only.
    #[serde(default, alias = "actions", skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<Instruction>>,
    /// Replaces the site's extractors for this call only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extractors: Option<Vec<Extractor>>,
    #[serde(default)]
    pub options: ScrapeOptions,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            instructions: None,
            extractors: None,
            options: ScrapeOptions::default(),
        }
    }

    /// Scheduled runs must observe live content.
    pub fn without_cache(mut self) -> Self {
        self.options.use_cache = false;
        self
    }

    pub fn with_options(mut self, options: ScrapeOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeOptions {
    pub use_cache: bool,
    /// Overrides the default cache TTL for this result.
    pub cache_ttl_secs: Option<u64>,
    pub screenshot: bool,
    pub include_frames: bool,
    /// Deadline for the whole scrape, browser work included.
    pub timeout_ms: Option<u64>,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_ttl_secs: None,
            screenshot: false,
            include_frames: true,
            timeout_ms: None,
        }
    }
}

impl ScrapeOptions {
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Outcome of the robots.txt check recorded on every non-cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotsStatus {
    Allowed,
    Disallowed,
    /// robots.txt absent (4xx); crawling is allowed.
    NotFound,
    /// Fetch or parse failed; crawling is allowed.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub status: RobotsStatus,
}

impl RobotsVerdict {
    pub fn from_status(status: RobotsStatus) -> Self {
        Self {
            allowed: status != RobotsStatus::Disallowed,
            status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeMetadata {
    pub processing_time_ms: u64,
    pub instructions_executed: usize,
    pub extractors_run: usize,
    pub frames_processed: usize,
    pub cache_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage_bytes: Option<u64>,
    pub robots_txt_checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robots_txt_status: Option<RobotsStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// The orchestrator's bounded output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub success: bool,
    pub url: String,
    pub data: ExtractedData,
    pub metadata: ScrapeMetadata,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ScrapeResult {
    pub fn success(url: impl Into<String>, data: ExtractedData, metadata: ScrapeMetadata) -> Self {
        Self {
            success: true,
            url: url.into(),
            data,
            metadata,
            errors: Vec::new(),
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(url: impl Into<String>, error: &AppError, metadata: ScrapeMetadata) -> Self {
        Self {
            success: false,
            url: url.into(),
            data: ExtractedData::new(),
            metadata,
            errors: vec![error.to_string()],
            error_kind: Some(error.kind().to_string()),
            timestamp: Utc::now(),
        }
    }

    /// Number of extracted values, counting array elements and nested frame sections.
    pub fn item_count(&self) -> usize {
        fn count(value: &serde_json::Value) -> usize {
            match value {
                serde_json::Value::Null => 0,
                serde_json::Value::Array(items) => items.iter().map(count).sum(),
                serde_json::Value::Object(map) => map.values().map(count).sum(),
                _ => 1,
            }
        }
        self.data.values().map(count).sum()
    }
}
