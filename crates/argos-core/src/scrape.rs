use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::ResultCache;
use crate::engine::{AutomationEngine, save_screenshot, with_timeout};
use crate::error::AppError;
use crate::frames::extract_all_frames;
use crate::models::{ExtractedData, Extractor, Instruction, SiteConfig, validate_overrides};
use crate::result::{DEFAULT_CACHE_TTL, ScrapeMetadata, ScrapeRequest, ScrapeResult};
use crate::throttle::PolitenessConfig;
use crate::traits::{
    Browser, BrowserLauncher, Document, Page, RobotsPolicy, Scraper, SiteConfigSource,
};

/// Upper bound on browser teardown so a wedged process cannot stall the caller.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`ScrapeService`].
#[derive(Debug, Clone)]
pub struct ScrapeServiceConfig {
    pub default_cache_ttl: Duration,
    /// Directory for requested, instruction, and on-error screenshots.
    pub screenshot_dir: PathBuf,
    /// Random jitter added on top of each site's politeness delay.
    pub politeness_jitter: Duration,
}

impl Default for ScrapeServiceConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl: DEFAULT_CACHE_TTL,
            screenshot_dir: PathBuf::from("./data/screenshots"),
            politeness_jitter: Duration::ZERO,
        }
    }
}

impl ScrapeServiceConfig {
    pub fn with_default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl = ttl;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    pub fn with_politeness_jitter(mut self, jitter: Duration) -> Self {
        self.politeness_jitter = jitter;
        self
    }
}

/// Orchestrates one scrape: cache → robots.txt → site config → politeness
/// delay → browser automation → extraction → frames → cache write.
///
/// Every failure is folded into a structured [`ScrapeResult`]; callers never
/// see an `Err`. The browser is closed on every path that launched one.
#[derive(Clone)]
pub struct ScrapeService<L, R, C>
where
    L: BrowserLauncher,
    R: RobotsPolicy,
    C: SiteConfigSource,
{
    launcher: L,
    robots: R,
    sites: C,
    cache: ResultCache,
    config: ScrapeServiceConfig,
}

impl<L, R, C> ScrapeService<L, R, C>
where
    L: BrowserLauncher,
    R: RobotsPolicy,
    C: SiteConfigSource,
{
    pub fn new(launcher: L, robots: R, sites: C) -> Self {
        Self::with_config(launcher, robots, sites, ScrapeServiceConfig::default())
    }

    pub fn with_config(launcher: L, robots: R, sites: C, config: ScrapeServiceConfig) -> Self {
        Self {
            launcher,
            robots,
            sites,
            cache: ResultCache::new(config.default_cache_ttl),
            config,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn sites(&self) -> &C {
        &self.sites
    }

    /// Scrape without external cancellation.
    pub async fn execute(&self, request: &ScrapeRequest) -> ScrapeResult {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Scrape, aborting at the next suspension point once `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> ScrapeResult {
        let started = Instant::now();

        if request.options.use_cache
            && let Some(hit) = self.cache.get(&request.url).await
        {
            let mut result = (*hit).clone();
            result.metadata.cache_used = true;
            result.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let mut metadata = ScrapeMetadata::default();
        let outcome = self.run(request, cancel, &mut metadata).await;
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(data) => {
                let result = ScrapeResult::success(&request.url, data, metadata);
                tracing::info!(
                    url = %request.url,
                    items = result.item_count(),
                    elapsed_ms = result.metadata.processing_time_ms,
                    "Scrape succeeded"
                );
                self.cache
                    .insert(&request.url, result.clone(), request.options.cache_ttl())
                    .await;
                result
            }
            Err(e) => {
                tracing::warn!(url = %request.url, kind = e.kind(), error = %e, "Scrape failed");
                ScrapeResult::failure(&request.url, &e, metadata)
            }
        }
    }

    async fn run(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
        metadata: &mut ScrapeMetadata,
    ) -> Result<ExtractedData, AppError> {
        let url = Url::parse(&request.url)
            .map_err(|e| AppError::ValidationError(format!("invalid URL '{}': {e}", request.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::ValidationError(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        validate_overrides(request.instructions.as_deref(), request.extractors.as_deref())?;

        let verdict = self.robots.check(url.as_str()).await;
        metadata.robots_txt_checked = true;
        metadata.robots_txt_status = Some(verdict.status);
        if !verdict.allowed {
            return Err(AppError::PolicyBlocked(request.url.clone()));
        }

        let site = match self.sites.resolve(&url).await? {
            Some(site) if site.enabled => site,
            Some(site) => {
                tracing::info!(site_id = %site.id, "Site configuration is disabled");
                return Err(AppError::ConfigurationMissing(request.url.clone()));
            }
            None => return Err(AppError::ConfigurationMissing(request.url.clone())),
        };
        metadata.site_id = Some(site.id.clone());

        let instructions = site.plan_for(
            &request.url,
            request.instructions.as_deref().unwrap_or(&site.instructions),
        );
        let extractors = request
            .extractors
            .as_deref()
            .unwrap_or(&site.extractors);

        PolitenessConfig::new(site.options.politeness_delay())
            .with_jitter(self.config.politeness_jitter)
            .wait(cancel)
            .await?;

        let engine = AutomationEngine::initialize(
            &self.launcher,
            &site.options,
            &self.config.screenshot_dir,
        )
        .await?;

        let outcome = {
            let drive = async {
                match request.options.timeout() {
                    Some(limit) => {
                        with_timeout(
                            limit,
                            self.drive(&engine, &site, &instructions, extractors, request, metadata),
                        )
                        .await
                    }
                    None => {
                        self.drive(&engine, &site, &instructions, extractors, request, metadata)
                            .await
                    }
                }
            };
            tokio::select! {
                outcome = drive => outcome,
                _ = cancel.cancelled() => Err(AppError::Cancelled(request.url.clone())),
            }
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, engine.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Browser close failed"),
            Err(_) => tracing::warn!("Browser close timed out"),
        }

        outcome
    }

    async fn drive(
        &self,
        engine: &AutomationEngine<L::Browser>,
        site: &SiteConfig,
        instructions: &[Instruction],
        extractors: &[Extractor],
        request: &ScrapeRequest,
        metadata: &mut ScrapeMetadata,
    ) -> Result<ExtractedData, AppError> {
        let page = engine.create_page().await?;

        match self
            .drive_page(engine, &page, site, instructions, extractors, request, metadata)
            .await
        {
            Ok(data) => Ok(data),
            Err(e) => {
                if site.options.screenshot_on_error {
                    let name = format!("error-{}-{}", site.id, chrono::Utc::now().timestamp_millis());
                    self.capture(&page, site, &name, metadata).await;
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_page(
        &self,
        engine: &AutomationEngine<L::Browser>,
        page: &<L::Browser as Browser>::Page,
        site: &SiteConfig,
        instructions: &[Instruction],
        extractors: &[Extractor],
        request: &ScrapeRequest,
        metadata: &mut ScrapeMetadata,
    ) -> Result<ExtractedData, AppError> {
        for instruction in instructions {
            if engine.execute_instruction(page, instruction).await? {
                metadata.instructions_executed += 1;
            }
        }

        let mut data = engine.extract_data(page, extractors).await?;
        metadata.extractors_run = extractors.len();

        if request.options.include_frames && site.options.wait_for_iframes {
            let frames = extract_all_frames(page, extractors, site.options.iframe_timeout()).await;
            metadata.frames_processed = frames.frames_processed;
            data.extend(frames.sections);
        }

        metadata.final_url = page.url().await.ok().flatten();
        metadata.memory_usage_bytes = page.memory_usage().await.ok().flatten();

        if request.options.screenshot {
            let name = format!("{}-{}", site.id, chrono::Utc::now().timestamp_millis());
            self.capture(page, site, &name, metadata).await;
        }

        Ok(data)
    }

    /// Screenshot failures are logged, never propagated.
    async fn capture<P: Page>(
        &self,
        page: &P,
        site: &SiteConfig,
        name: &str,
        metadata: &mut ScrapeMetadata,
    ) {
        match save_screenshot(page, &self.config.screenshot_dir, name, site.options.timeout()).await {
            Ok(path) => metadata.screenshot = Some(path.display().to_string()),
            Err(e) => tracing::warn!(site_id = %site.id, error = %e, "Screenshot failed"),
        }
    }
}

impl<L, R, C> Scraper for ScrapeService<L, R, C>
where
    L: BrowserLauncher,
    R: RobotsPolicy,
    C: SiteConfigSource,
{
    async fn scrape(&self, request: ScrapeRequest, cancel: CancellationToken) -> ScrapeResult {
        self.execute_with_cancel(&request, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Extractor, Instruction};
    use crate::result::{RobotsStatus, ScrapeOptions};
    use crate::sites::StaticSites;
    use crate::testutil::*;

    fn service(
        launcher: MockLauncher,
        robots: MockRobots,
        sites: Vec<SiteConfig>,
    ) -> ScrapeService<MockLauncher, MockRobots, StaticSites> {
        let config = ScrapeServiceConfig::default().with_screenshot_dir(std::env::temp_dir());
        ScrapeService::with_config(launcher, robots, StaticSites::new(sites), config)
    }

    fn listing_page() -> MockPage {
        MockPage::new()
            .with_text("h1", &["Concerts"])
            .with_text(".event", &["Jazz night", "Folk evening"])
    }

    fn events_site() -> SiteConfig {
        let mut site = make_site("events", "example.com");
        site.extractors = vec![
            Extractor::text("title", "h1").required(),
            Extractor::text("events", ".event").multiple(),
        ];
        site
    }

    #[tokio::test]
    async fn happy_path_extracts_and_closes_browser() {
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![events_site()]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.data["title"], "Concerts");
        assert_eq!(result.data["events"], serde_json::json!(["Jazz night", "Folk evening"]));
        assert_eq!(result.metadata.site_id.as_deref(), Some("events"));
        assert_eq!(result.metadata.instructions_executed, 1);
        assert_eq!(result.metadata.extractors_run, 2);
        assert!(result.metadata.robots_txt_checked);
        assert!(!result.metadata.cache_used);
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_served_from_cache() {
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![events_site()]);
        let request = ScrapeRequest::new("https://example.com/events");

        let first = svc.execute(&request).await;
        let second = svc.execute(&request).await;

        assert!(!first.metadata.cache_used);
        assert!(second.metadata.cache_used);
        assert_eq!(first.data, second.data);
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test]
    async fn cache_bypass_still_launches() {
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![events_site()]);
        let request = ScrapeRequest::new("https://example.com/events").without_cache();

        svc.execute(&request).await;
        let second = svc.execute(&request).await;

        assert!(!second.metadata.cache_used);
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn failed_results_are_not_cached() {
        let launcher = MockLauncher::new(MockPage::new());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![events_site()]);
        let request = ScrapeRequest::new("https://example.com/events");

        assert!(!svc.execute(&request).await.success);
        assert!(!svc.execute(&request).await.metadata.cache_used);
        assert_eq!(launcher.launch_count(), 2);
    }

    #[tokio::test]
    async fn robots_disallow_blocks_before_launch() {
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher.clone(), MockRobots::disallow(), vec![events_site()]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("policy_blocked"));
        assert_eq!(result.metadata.robots_txt_status, Some(RobotsStatus::Disallowed));
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn missing_robots_fails_open() {
        let launcher = MockLauncher::new(listing_page());
        let svc = service(
            launcher.clone(),
            MockRobots::with_status(RobotsStatus::NotFound),
            vec![events_site()],
        );

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;

        assert!(result.success);
        assert!(result.metadata.robots_txt_checked);
        assert_eq!(result.metadata.robots_txt_status, Some(RobotsStatus::NotFound));
    }

    #[tokio::test]
    async fn disabled_site_is_configuration_missing() {
        let mut site = events_site();
        site.enabled = false;
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![site]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("configuration_missing"));
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn unknown_site_is_configuration_missing() {
        let svc = service(MockLauncher::new(listing_page()), MockRobots::allow(), vec![events_site()]);
        let result = svc.execute(&ScrapeRequest::new("https://unknown.org/")).await;
        assert_eq!(result.error_kind.as_deref(), Some("configuration_missing"));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let svc = service(MockLauncher::new(listing_page()), MockRobots::allow(), vec![]);
        let result = svc.execute(&ScrapeRequest::new("not a url")).await;
        assert_eq!(result.error_kind.as_deref(), Some("validation_error"));
    }

    #[tokio::test]
    async fn required_extractor_miss_names_the_field() {
        let mut site = make_site("events", "example.com");
        site.extractors = vec![Extractor::text("price", ".price").required()];
        let launcher = MockLauncher::new(MockPage::new());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![site]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/")).await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("price"));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn optional_instruction_failure_still_succeeds() {
        let mut site = events_site();
        site.instructions = vec![
            Instruction::navigate(1, "https://example.com/"),
            Instruction::new(2, "Dismiss banner", Action::Click { selector: "#banner".into() })
                .optional(),
        ];
        let launcher = MockLauncher::new(listing_page().failing("#banner"));
        let svc = service(launcher, MockRobots::allow(), vec![site.clone()]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;
        assert!(result.success);
        assert_eq!(result.metadata.instructions_executed, 1);

        site.instructions[1].optional = false;
        let launcher = MockLauncher::new(listing_page().failing("#banner"));
        let svc = service(launcher.clone(), MockRobots::allow(), vec![site]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("instruction_failed"));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn requested_url_replaces_first_navigate() {
        let mut site = events_site();
        site.instructions = vec![Instruction::navigate(1, "https://example.com/placeholder")];
        let page = listing_page();
        let launcher = MockLauncher::new(page.clone());
        let svc = service(launcher, MockRobots::allow(), vec![site]);

        svc.execute(&ScrapeRequest::new("https://example.com/events/7")).await;

        assert_eq!(page.actions()[0], "goto https://example.com/events/7");
    }

    #[tokio::test]
    async fn request_overrides_replace_site_rules() {
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher, MockRobots::allow(), vec![events_site()]);

        let mut request = ScrapeRequest::new("https://example.com/events");
        request.extractors = Some(vec![Extractor::text("heading", "h1")]);
        let result = svc.execute(&request).await;

        assert!(result.success);
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data["heading"], "Concerts");
    }

    #[tokio::test]
    async fn malformed_overrides_are_rejected_without_waiting() {
        let mut site = events_site();
        site.options.politeness_delay_ms = 60_000;
        let launcher = MockLauncher::new(listing_page());
        let svc = service(launcher.clone(), MockRobots::allow(), vec![site]);

        let mut duplicate = ScrapeRequest::new("https://example.com/events");
        duplicate.extractors = Some(vec![
            Extractor::text("title", "h1"),
            Extractor::text("title", ".event"),
        ]);

        let mut empty_selector = ScrapeRequest::new("https://example.com/events");
        empty_selector.extractors = Some(vec![Extractor::text("title", " ")]);

        let mut type_without_value = ScrapeRequest::new("https://example.com/events");
        type_without_value.instructions = Some(vec![Instruction {
            step: 1,
            description: "Search".into(),
            action: Action::Type {
                selector: "#q".into(),
                value: String::new(),
            },
            timeout_ms: None,
            wait_for: None,
            optional: false,
        }]);

        for request in [duplicate, empty_selector, type_without_value] {
            let result = tokio::time::timeout(Duration::from_secs(5), svc.execute(&request))
                .await
                .expect("validation must not sit out the politeness delay");
            assert!(!result.success);
            assert_eq!(result.error_kind.as_deref(), Some("validation_error"));
            assert!(!result.metadata.robots_txt_checked);
        }
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn frames_are_merged_under_synthetic_keys() {
        let page = listing_page()
            .with_frame(MockFrame::new().with_text("h1", &["Embedded"]))
            .with_frame(MockFrame::new());
        let launcher = MockLauncher::new(page);
        let svc = service(launcher, MockRobots::allow(), vec![events_site()]);

        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.metadata.frames_processed, 2);
        assert_eq!(result.data["iframe_0"]["title"], "Embedded");
        assert!(!result.data.contains_key("iframe_1"));

        let no_frames = ScrapeRequest::new("https://example.com/other").with_options(ScrapeOptions {
            include_frames: false,
            ..Default::default()
        });
        let result = svc.execute(&no_frames).await;
        assert_eq!(result.metadata.frames_processed, 0);
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let svc = service(MockLauncher::failing("no chromium"), MockRobots::allow(), vec![events_site()]);
        let result = svc.execute(&ScrapeRequest::new("https://example.com/events")).await;
        assert_eq!(result.error_kind.as_deref(), Some("browser_launch_failed"));
    }

    #[tokio::test]
    async fn cancellation_still_closes_browser() {
        let mut site = events_site();
        site.instructions = vec![
            Instruction::navigate(1, "https://example.com/"),
            Instruction::new(2, "Wait", Action::Wait { selector: Some("#slow".into()), value: None })
                .with_timeout(Duration::from_secs(60)),
        ];
        let launcher = MockLauncher::new(listing_page().hanging("#slow"));
        let svc = service(launcher.clone(), MockRobots::allow(), vec![site]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = svc
            .execute_with_cancel(&ScrapeRequest::new("https://example.com/events"), &cancel)
            .await;

        assert_eq!(result.error_kind.as_deref(), Some("cancelled"));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn request_deadline_times_out() {
        let mut site = events_site();
        site.instructions = vec![
            Instruction::navigate(1, "https://example.com/"),
            Instruction::new(2, "Wait", Action::Wait { selector: Some("#slow".into()), value: None })
                .with_timeout(Duration::from_secs(60)),
        ];
        let launcher = MockLauncher::new(listing_page().hanging("#slow"));
        let svc = service(launcher.clone(), MockRobots::allow(), vec![site]);

        let request = ScrapeRequest::new("https://example.com/events").with_options(ScrapeOptions {
            timeout_ms: Some(50),
            ..Default::default()
        });
        let result = svc.execute(&request).await;

        assert_eq!(result.error_kind.as_deref(), Some("timeout"));
        assert_eq!(launcher.close_count(), 1);
    }

    #[tokio::test]
    async fn screenshot_on_request_is_recorded() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ScrapeServiceConfig::default().with_screenshot_dir(dir.path());
        let svc = ScrapeService::with_config(
            MockLauncher::new(listing_page()),
            MockRobots::allow(),
            StaticSites::new(vec![events_site()]),
            config,
        );

        let request = ScrapeRequest::new("https://example.com/events").with_options(ScrapeOptions {
            screenshot: true,
            ..Default::default()
        });
        let result = svc.execute(&request).await;

        let path = result.metadata.screenshot.expect("screenshot path");
        assert!(std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn screenshot_failure_never_fails_scrape() {
        let svc = service(
            MockLauncher::new(listing_page().failing_screenshot()),
            MockRobots::allow(),
            vec![events_site()],
        );
        let request = ScrapeRequest::new("https://example.com/events").with_options(ScrapeOptions {
            screenshot: true,
            ..Default::default()
        });

        let result = svc.execute(&request).await;
        assert!(result.success);
        assert!(result.metadata.screenshot.is_none());
    }
}
