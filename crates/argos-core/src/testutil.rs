//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::{ScheduleUpdate, SiteRegistration};
use crate::models::{BrowserOptions, ExtractedData, SiteConfig};
use crate::result::{RobotsStatus, RobotsVerdict, ScrapeMetadata, ScrapeRequest, ScrapeResult};
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::traits::{
    Browser, BrowserLauncher, Document, Frame, Notification, Notifier, Page, RegistrationStore,
    ResultSink, RobotsPolicy, SavedResult, Scraper,
};

// ---------------------------------------------------------------------------
// Scripted document model shared by MockPage and MockFrame
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DocState {
    texts: HashMap<String, Vec<String>>,
    attributes: HashMap<(String, String), Vec<String>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    content_frames: HashMap<String, MockFrame>,
}

impl DocState {
    fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        if self.failing.contains(selector) {
            return Err(AppError::ExtractionFailed(format!(
                "selector '{selector}' failed"
            )));
        }
        let values = match attribute {
            Some(attr) => self
                .attributes
                .get(&(selector.to_string(), attr.to_string())),
            None => self.texts.get(selector),
        }
        .cloned()
        .unwrap_or_default();

        Ok(if multiple {
            values
        } else {
            values.into_iter().take(1).collect()
        })
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ---------------------------------------------------------------------------
// MockFrame
// ---------------------------------------------------------------------------

/// An embedded document with scripted selector results.
#[derive(Clone, Default)]
pub struct MockFrame {
    doc: Arc<Mutex<DocState>>,
    never_loads: bool,
}

impl MockFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, selector: &str, values: &[&str]) -> Self {
        self.doc
            .lock()
            .unwrap()
            .texts
            .insert(selector.to_string(), to_strings(values));
        self
    }

    pub fn failing(self, selector: &str) -> Self {
        self.doc.lock().unwrap().failing.insert(selector.to_string());
        self
    }

    pub fn with_content_frame(self, selector: &str, frame: MockFrame) -> Self {
        self.doc
            .lock()
            .unwrap()
            .content_frames
            .insert(selector.to_string(), frame);
        self
    }

    /// `wait_for_load` never resolves.
    pub fn never_loads(mut self) -> Self {
        self.never_loads = true;
        self
    }
}

impl Document for MockFrame {
    type Frame = MockFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        self.doc.lock().unwrap().select(selector, attribute, multiple)
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<MockFrame>, AppError> {
        Ok(self.doc.lock().unwrap().content_frames.get(selector).cloned())
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        Ok(Some("https://example.com/frame".to_string()))
    }
}

impl Frame for MockFrame {
    async fn wait_for_load(&self) -> Result<(), AppError> {
        if self.never_loads {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockPage
// ---------------------------------------------------------------------------

struct PageState {
    url: String,
    frames: Vec<MockFrame>,
    actions: Vec<String>,
    fail_navigation: bool,
    fail_screenshot: bool,
}

/// A browser tab over a scripted document. Clones share state, so a test
/// can keep a handle and inspect the actions the engine performed.
#[derive(Clone)]
pub struct MockPage {
    doc: Arc<Mutex<DocState>>,
    state: Arc<Mutex<PageState>>,
}

impl Default for MockPage {
    fn default() -> Self {
        Self {
            doc: Arc::new(Mutex::new(DocState::default())),
            state: Arc::new(Mutex::new(PageState {
                url: "https://example.com/".to_string(),
                frames: Vec::new(),
                actions: Vec::new(),
                fail_navigation: false,
                fail_screenshot: false,
            })),
        }
    }
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, selector: &str, values: &[&str]) -> Self {
        self.doc
            .lock()
            .unwrap()
            .texts
            .insert(selector.to_string(), to_strings(values));
        self
    }

    pub fn with_attribute(self, selector: &str, attribute: &str, values: &[&str]) -> Self {
        self.doc.lock().unwrap().attributes.insert(
            (selector.to_string(), attribute.to_string()),
            to_strings(values),
        );
        self
    }

    /// Clicks, typing, waits and selects on `selector` return an error.
    pub fn failing(self, selector: &str) -> Self {
        self.doc.lock().unwrap().failing.insert(selector.to_string());
        self
    }

    /// Waits and clicks on `selector` never resolve.
    pub fn hanging(self, selector: &str) -> Self {
        self.doc.lock().unwrap().hanging.insert(selector.to_string());
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.state.lock().unwrap().fail_navigation = true;
        self
    }

    pub fn failing_screenshot(self) -> Self {
        self.state.lock().unwrap().fail_screenshot = true;
        self
    }

    pub fn with_frame(self, frame: MockFrame) -> Self {
        self.state.lock().unwrap().frames.push(frame);
        self
    }

    pub fn with_content_frame(self, selector: &str, frame: MockFrame) -> Self {
        self.doc
            .lock()
            .unwrap()
            .content_frames
            .insert(selector.to_string(), frame);
        self
    }

    /// Recorded interactions, in order.
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    fn record(&self, action: String) {
        self.state.lock().unwrap().actions.push(action);
    }

    /// Fails or hangs according to the script for `selector`.
    async fn interact(&self, selector: &str) -> Result<(), AppError> {
        let (failing, hanging) = {
            let doc = self.doc.lock().unwrap();
            (doc.failing.contains(selector), doc.hanging.contains(selector))
        };
        if failing {
            return Err(AppError::ExtractionFailed(format!(
                "no element matches '{selector}'"
            )));
        }
        if hanging {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

impl Document for MockPage {
    type Frame = MockFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        self.doc.lock().unwrap().select(selector, attribute, multiple)
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<MockFrame>, AppError> {
        Ok(self.doc.lock().unwrap().content_frames.get(selector).cloned())
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        Ok(Some(self.state.lock().unwrap().url.clone()))
    }
}

impl Page for MockPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.record(format!("goto {url}"));
        let mut state = self.state.lock().unwrap();
        if state.fail_navigation {
            return Err(AppError::NetworkFetchFailed(format!("net::ERR_NAME_NOT_RESOLVED {url}")));
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), AppError> {
        self.record(format!("click {selector}"));
        self.interact(selector).await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AppError> {
        self.record(format!("type {selector} {text}"));
        self.interact(selector).await
    }

    async fn scroll(&self, selector: Option<&str>) -> Result<(), AppError> {
        self.record(format!("scroll {}", selector.unwrap_or("<bottom>")));
        match selector {
            Some(selector) => self.interact(selector).await,
            None => Ok(()),
        }
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), AppError> {
        self.record(format!("wait_for_selector {selector}"));
        self.interact(selector).await
    }

    async fn wait_for_navigation(&self) -> Result<(), AppError> {
        self.record("wait_for_navigation".to_string());
        Ok(())
    }

    async fn wait_for_network_idle(&self) -> Result<(), AppError> {
        self.record("wait_for_network_idle".to_string());
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        if self.state.lock().unwrap().fail_screenshot {
            return Err(AppError::ExtractionFailed("screenshot failed".into()));
        }
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn frames(&self) -> Result<Vec<MockFrame>, AppError> {
        Ok(self.state.lock().unwrap().frames.clone())
    }

    async fn memory_usage(&self) -> Result<Option<u64>, AppError> {
        Ok(Some(4 * 1024 * 1024))
    }
}

// ---------------------------------------------------------------------------
// MockLauncher / MockBrowser
// ---------------------------------------------------------------------------

/// Launcher whose browsers all hand out the same scripted page.
#[derive(Clone)]
pub struct MockLauncher {
    page: MockPage,
    launch_error: Option<String>,
    launches: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockLauncher {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            launch_error: None,
            launches: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Self::new(MockPage::new())
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl BrowserLauncher for MockLauncher {
    type Browser = MockBrowser;

    async fn launch(&self, _options: &BrowserOptions) -> Result<MockBrowser, AppError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.launch_error {
            return Err(AppError::BrowserLaunchFailed(message.clone()));
        }
        Ok(MockBrowser {
            page: self.page.clone(),
            closes: Arc::clone(&self.closes),
        })
    }
}

pub struct MockBrowser {
    page: MockPage,
    closes: Arc<AtomicUsize>,
}

impl Browser for MockBrowser {
    type Page = MockPage;

    async fn new_page(&self, _options: &BrowserOptions) -> Result<MockPage, AppError> {
        Ok(self.page.clone())
    }

    async fn close(self) -> Result<(), AppError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockRobots
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockRobots {
    status: RobotsStatus,
    checked: Arc<Mutex<Vec<String>>>,
}

impl MockRobots {
    pub fn with_status(status: RobotsStatus) -> Self {
        Self {
            status,
            checked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn allow() -> Self {
        Self::with_status(RobotsStatus::Allowed)
    }

    pub fn disallow() -> Self {
        Self::with_status(RobotsStatus::Disallowed)
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }
}

impl RobotsPolicy for MockRobots {
    async fn check(&self, url: &str) -> RobotsVerdict {
        self.checked.lock().unwrap().push(url.to_string());
        RobotsVerdict::from_status(self.status)
    }
}

// ---------------------------------------------------------------------------
// MockScraper
// ---------------------------------------------------------------------------

/// Scraper returning `{"title": <url>}` for every URL not marked failing.
///
/// A gated scraper blocks each call until [`MockScraper::release`] hands out
/// a permit or the call's cancellation token fires.
#[derive(Clone, Default)]
pub struct MockScraper {
    requests: Arc<Mutex<Vec<ScrapeRequest>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn failing_url(self, url: &str) -> Self {
        self.failing.lock().unwrap().insert(url.to_string());
        self
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub fn requests(&self) -> Vec<ScrapeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Scraper for MockScraper {
    async fn scrape(&self, request: ScrapeRequest, cancel: CancellationToken) -> ScrapeResult {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                () = cancel.cancelled() => {
                    return ScrapeResult::failure(
                        &request.url,
                        &AppError::Cancelled(request.url.clone()),
                        ScrapeMetadata::default(),
                    );
                }
            }
        }

        if self.failing.lock().unwrap().contains(&request.url) {
            return ScrapeResult::failure(
                &request.url,
                &AppError::NetworkFetchFailed("connection refused".into()),
                ScrapeMetadata::default(),
            );
        }

        let mut data = ExtractedData::new();
        data.insert("title".into(), serde_json::json!(request.url));
        ScrapeResult::success(&request.url, data, ScrapeMetadata::default())
    }
}

// ---------------------------------------------------------------------------
// MockRegistrationStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockRegistrationStore {
    registrations: Arc<Mutex<Vec<SiteRegistration>>>,
}

impl MockRegistrationStore {
    pub fn new(registrations: Vec<SiteRegistration>) -> Self {
        Self {
            registrations: Arc::new(Mutex::new(registrations)),
        }
    }

    /// Flip the enabled flag in place, as an operator would.
    pub fn set_enabled(&self, site_id: &str, enabled: bool) {
        if let Some(reg) = self
            .registrations
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.id() == site_id)
        {
            reg.site.enabled = enabled;
        }
    }
}

impl RegistrationStore for MockRegistrationStore {
    async fn list(&self) -> Result<Vec<SiteRegistration>, AppError> {
        Ok(self.registrations.lock().unwrap().clone())
    }

    async fn get(&self, site_id: &str) -> Result<Option<SiteRegistration>, AppError> {
        Ok(self
            .registrations
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id() == site_id)
            .cloned())
    }

    async fn upsert(&self, registration: &SiteRegistration) -> Result<(), AppError> {
        let mut all = self.registrations.lock().unwrap();
        match all.iter_mut().find(|r| r.id() == registration.id()) {
            Some(existing) => *existing = registration.clone(),
            None => all.push(registration.clone()),
        }
        Ok(())
    }

    async fn record_schedule(
        &self,
        site_id: &str,
        update: &ScheduleUpdate,
    ) -> Result<bool, AppError> {
        let mut all = self.registrations.lock().unwrap();
        let Some(existing) = all.iter_mut().find(|r| r.id() == site_id) else {
            return Ok(false);
        };
        update.apply_to(existing);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MockResultSink
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockResultSink {
    saved: Arc<Mutex<Vec<(String, ScrapeResult)>>>,
    error: Arc<Mutex<Option<String>>>,
}

impl MockResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(message: &str) -> Self {
        let sink = Self::default();
        *sink.error.lock().unwrap() = Some(message.to_string());
        sink
    }

    pub fn saved(&self) -> Vec<(String, ScrapeResult)> {
        self.saved.lock().unwrap().clone()
    }
}

impl ResultSink for MockResultSink {
    async fn save(&self, site_id: &str, result: &ScrapeResult) -> Result<SavedResult, AppError> {
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(AppError::StorageError(message));
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push((site_id.to_string(), result.clone()));
        let filename = format!("{site_id}_{}.json", saved.len());
        Ok(SavedResult {
            path: std::path::PathBuf::from("/mock").join(&filename),
            filename,
            file_size: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sent notifications as `<event>:<site id>`.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| match n {
                Notification::NewContent { site_id, .. } => format!("new_content:{site_id}"),
                Notification::Error { site_id, .. } => format!("error:{site_id}"),
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records scheduler events as short strings.
#[derive(Default)]
pub struct MockReporter {
    events: Mutex<Vec<String>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let line = match event {
            SchedulerEvent::Started { .. } => "started".to_string(),
            SchedulerEvent::Tick { .. } => "tick".to_string(),
            SchedulerEvent::JobLaunched { site_id, .. } => format!("launched:{site_id}"),
            SchedulerEvent::JobDeferred { site_id } => format!("deferred:{site_id}"),
            SchedulerEvent::UrlFailed { url, .. } => format!("url_failed:{url}"),
            SchedulerEvent::NewContent { site_id, .. } => format!("new_content:{site_id}"),
            SchedulerEvent::JobFinished {
                site_id, status, ..
            } => format!("finished:{site_id}:{status}"),
            SchedulerEvent::Stopping { .. } => "stopping".to_string(),
            SchedulerEvent::JobAbandoned { site_id, .. } => format!("abandoned:{site_id}"),
            SchedulerEvent::Stopped => "stopped".to_string(),
        };
        self.events.lock().unwrap().push(line);
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// An enabled site with no instructions, no extractors and no politeness delay.
pub fn make_site(id: &str, domain: &str) -> SiteConfig {
    SiteConfig {
        id: id.to_string(),
        name: id.to_string(),
        domain: domain.to_string(),
        url_patterns: Vec::new(),
        instructions: Vec::new(),
        extractors: Vec::new(),
        options: BrowserOptions {
            politeness_delay_ms: 0,
            ..Default::default()
        },
        enabled: true,
        version: "1.0.0".to_string(),
        updated_at: None,
    }
}

pub fn make_registration(id: &str, domain: &str) -> SiteRegistration {
    SiteRegistration::new(make_site(id, domain))
}

pub fn make_result(url: &str) -> ScrapeResult {
    let mut data = ExtractedData::new();
    data.insert("title".into(), serde_json::json!("Example"));
    ScrapeResult::success(url, data, ScrapeMetadata::default())
}
