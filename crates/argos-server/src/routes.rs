use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use argos_core::AppError;
use argos_core::traits::SiteConfigSource;

use crate::dto::{
    CacheStatsResponse, ClearCacheQuery, ClearCacheResponse, ErrorResponse, HealthResponse,
    ReloadResponse, SchedulerStartResponse, SchedulerStatusResponse, SchedulerStopResponse,
    ScrapeRequest, ScrapeResponse, SiteListResponse, SiteSummary,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::{AppState, Services};

/// Build the full router. Only `POST /scrape` is rate limited, per client IP,
/// which requires serving with `into_make_service_with_connect_info`.
pub fn router<S: Services>(
    state: Arc<AppState<S>>,
    scrapes_per_minute: u32,
) -> Result<Router, AppError> {
    if scrapes_per_minute == 0 {
        return Err(AppError::ConfigError(
            "scrape rate limit must be at least 1 per minute".into(),
        ));
    }
    let (period, burst) = scrape_quota(scrapes_per_minute);
    let governor = GovernorConfigBuilder::default()
        .period(period)
        .burst_size(burst)
        .finish()
        .ok_or_else(|| AppError::ConfigError("invalid scrape rate limit".into()))?;

    let limited = Router::new()
        .route("/scrape", post(scrape::<S>))
        .layer(GovernorLayer::new(governor));

    let api = Router::new()
        .route("/scrape/cache/stats", get(cache_stats::<S>))
        .route("/scrape/cache", delete(clear_cache::<S>))
        .route("/scheduler/start", post(start_scheduler::<S>))
        .route("/scheduler/stop", post(stop_scheduler::<S>))
        .route("/scheduler/status", get(scheduler_status::<S>))
        .route("/sites", get(list_sites::<S>))
        .route("/sites/reload", post(reload_sites::<S>))
        .route("/health", get(health::<S>));

    let docs = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi());

    Ok(limited.merge(api).with_state(state).merge(docs))
}

/// Token bucket for `per_minute` scrapes: `per_minute` tokens, one refilled
/// every `60s / per_minute`.
///
/// This enforces a sustained rate, not a fixed window. A client starting
/// with a full bucket can spend it and keep taking refills, so up to
/// `2 * per_minute - 1` scrapes may land in its first 60 seconds.
fn scrape_quota(per_minute: u32) -> (Duration, u32) {
    (
        Duration::from_millis(60_000 / u64::from(per_minute)),
        per_minute,
    )
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/scrape",
    request_body = ScrapeRequest,
    responses(
        (status = 200, description = "Scrape result; check `success`", body = ScrapeResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded"),
    ),
    tag = "scrape"
)]
pub async fn scrape<S: Services>(
    State(state): State<Arc<AppState<S>>>,
    axum::Json(body): axum::Json<ScrapeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.url.trim().is_empty() {
        return Err(AppError::ValidationError("url is required".into()).into());
    }

    let request = argos_core::result::ScrapeRequest::from(body);
    tracing::info!(url = %request.url, "Scrape requested");
    let result = state.scraper.execute(&request).await;

    Ok(axum::Json(ScrapeResponse::from(result)))
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/scrape/cache/stats",
    responses((status = 200, description = "Cache statistics", body = CacheStatsResponse)),
    tag = "cache"
)]
pub async fn cache_stats<S: Services>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    axum::Json(CacheStatsResponse::from(state.scraper.cache().stats().await))
}

#[utoipa::path(
    delete,
    path = "/scrape/cache",
    params(ClearCacheQuery),
    responses((status = 200, description = "Cache cleared", body = ClearCacheResponse)),
    tag = "cache"
)]
pub async fn clear_cache<S: Services>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ClearCacheQuery>,
) -> impl IntoResponse {
    let cache = state.scraper.cache();
    match &query.url {
        Some(url) => cache.invalidate(url).await,
        None => cache.clear().await,
    }
    tracing::info!(url = ?query.url, "Cache cleared");

    axum::Json(ClearCacheResponse {
        cleared: true,
        url: query.url,
    })
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/scheduler/start",
    responses((status = 200, description = "Scheduler running", body = SchedulerStartResponse)),
    tag = "scheduler"
)]
pub async fn start_scheduler<S: Services>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    let started = state.scheduler.start().await;
    axum::Json(SchedulerStartResponse {
        started,
        running: true,
    })
}

#[utoipa::path(
    post,
    path = "/scheduler/stop",
    responses((status = 200, description = "Scheduler stopped", body = SchedulerStopResponse)),
    tag = "scheduler"
)]
pub async fn stop_scheduler<S: Services>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    axum::Json(SchedulerStopResponse::from(state.scheduler.stop().await))
}

#[utoipa::path(
    get,
    path = "/scheduler/status",
    responses((status = 200, description = "Scheduler status", body = SchedulerStatusResponse)),
    tag = "scheduler"
)]
pub async fn scheduler_status<S: Services>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    axum::Json(SchedulerStatusResponse::from(state.scheduler.status().await))
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/sites",
    responses(
        (status = 200, description = "Loaded site configurations", body = SiteListResponse),
        (status = 500, description = "Sites directory unreadable", body = ErrorResponse),
    ),
    tag = "sites"
)]
pub async fn list_sites<S: Services>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<impl IntoResponse, ApiError> {
    let sites: Vec<SiteSummary> = state
        .scraper
        .sites()
        .list()
        .await?
        .into_iter()
        .map(SiteSummary::from)
        .collect();
    let total = sites.len();

    Ok(axum::Json(SiteListResponse { sites, total }))
}

#[utoipa::path(
    post,
    path = "/sites/reload",
    responses(
        (status = 200, description = "Configurations reloaded", body = ReloadResponse),
        (status = 500, description = "Sites directory unreadable", body = ErrorResponse),
    ),
    tag = "sites"
)]
pub async fn reload_sites<S: Services>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<impl IntoResponse, ApiError> {
    let loaded = state.scraper.sites().reload().await?;
    tracing::info!(loaded, "Site configurations reloaded");
    Ok(axum::Json(ReloadResponse { loaded }))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse)),
    tag = "system"
)]
pub async fn health<S: Services>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    let status = state.scheduler.status().await;
    axum::Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        scheduler_running: status.running,
    })
}
