use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Argos API",
        version = "0.1.0",
        description = "Robots-aware scraping engine with a change-detecting scheduler."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::cache_stats,
        crate::routes::clear_cache,
        crate::routes::start_scheduler,
        crate::routes::stop_scheduler,
        crate::routes::scheduler_status,
        crate::routes::list_sites,
        crate::routes::reload_sites,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeRequest,
        crate::dto::ScrapeOptionsBody,
        crate::dto::ScrapeResponse,
        crate::dto::CacheStatsResponse,
        crate::dto::ClearCacheResponse,
        crate::dto::SchedulerStartResponse,
        crate::dto::SchedulerStopResponse,
        crate::dto::SchedulerStatusResponse,
        crate::dto::SiteSummary,
        crate::dto::SiteListResponse,
        crate::dto::ReloadResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "scrape", description = "One-off scrapes"),
        (name = "cache", description = "Result cache"),
        (name = "scheduler", description = "Periodic scraping"),
        (name = "sites", description = "Site configurations"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/scrape",
            "/scrape/cache/stats",
            "/scrape/cache",
            "/scheduler/start",
            "/scheduler/stop",
            "/scheduler/status",
            "/sites",
            "/sites/reload",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
