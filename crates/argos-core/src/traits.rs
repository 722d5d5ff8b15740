use std::future::Future;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::AppError;
use crate::job::{ScheduleUpdate, SiteRegistration};
use crate::models::{BrowserOptions, SiteConfig};
use crate::result::{RobotsVerdict, ScrapeRequest, ScrapeResult};

/// A queryable document: the top-level page or one embedded frame.
///
/// `select` returns the raw (untrimmed) text or attribute values of the
/// first match, or of every match when `multiple` is set. No match is an
/// empty vector, not an error.
pub trait Document: Send + Sync {
    type Frame: Frame;

    fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;

    /// The document loaded by the iframe matching `selector`, if any.
    fn content_frame(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Option<Self::Frame>, AppError>> + Send;

    fn url(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send;
}

/// An embedded sub-document.
pub trait Frame: Document<Frame = Self> + Clone + 'static {
    /// Resolves once the frame's document has finished loading.
    fn wait_for_load(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// One browser tab. Every method is a suspension point; deadlines are
/// applied by the caller.
pub trait Page: Document {
    fn goto(&self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn click(&self, selector: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn type_text(
        &self,
        selector: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Scrolls `selector` into view, or to the bottom of the document.
    fn scroll(&self, selector: Option<&str>) -> impl Future<Output = Result<(), AppError>> + Send;

    fn wait_for_selector(&self, selector: &str)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn wait_for_navigation(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn wait_for_network_idle(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Full-page PNG.
    fn screenshot(&self) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// Every frame attached to the page except the main frame.
    fn frames(&self) -> impl Future<Output = Result<Vec<Self::Frame>, AppError>> + Send;

    /// Best-effort JS heap usage of the page.
    fn memory_usage(&self) -> impl Future<Output = Result<Option<u64>, AppError>> + Send;
}

/// A running browser process.
pub trait Browser: Send + Sync {
    type Page: Page;

    /// Opens a tab with the options' user agent and viewport applied and
    /// passive console/network observers attached.
    fn new_page(
        &self,
        options: &BrowserOptions,
    ) -> impl Future<Output = Result<Self::Page, AppError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Starts browser processes. One process per scrape.
pub trait BrowserLauncher: Send + Sync + Clone + 'static {
    type Browser: Browser;

    fn launch(
        &self,
        options: &BrowserOptions,
    ) -> impl Future<Output = Result<Self::Browser, AppError>> + Send;
}

/// Crawling policy for a URL. Implementations fail open.
pub trait RobotsPolicy: Send + Sync + Clone + 'static {
    fn check(&self, url: &str) -> impl Future<Output = RobotsVerdict> + Send;
}

/// Registered site configurations, matched by URL.
pub trait SiteConfigSource: Send + Sync + Clone + 'static {
    /// Best match for `url`: an enabled configuration if one matches,
    /// otherwise a disabled one.
    fn resolve(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<Option<SiteConfig>, AppError>> + Send;

    fn list(&self) -> impl Future<Output = Result<Vec<SiteConfig>, AppError>> + Send;

    /// Re-reads configurations from their source. Returns how many loaded.
    fn reload(&self) -> impl Future<Output = Result<usize, AppError>> + Send;
}

/// Anything that turns a request into exactly one bounded result.
pub trait Scraper: Send + Sync + 'static {
    fn scrape(
        &self,
        request: ScrapeRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = ScrapeResult> + Send;
}

/// Persists site registrations and their scheduling metadata.
pub trait RegistrationStore: Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = Result<Vec<SiteRegistration>, AppError>> + Send;

    fn get(
        &self,
        site_id: &str,
    ) -> impl Future<Output = Result<Option<SiteRegistration>, AppError>> + Send;

    /// Insert or replace by site id.
    fn upsert(
        &self,
        registration: &SiteRegistration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Write only the scheduler bookkeeping onto the stored registration,
    /// leaving every other field as currently stored. Returns false if the
    /// site id is no longer registered.
    fn record_schedule(
        &self,
        site_id: &str,
        update: &ScheduleUpdate,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Where a stored result landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResult {
    pub path: PathBuf,
    pub filename: String,
    pub file_size: u64,
}

/// The content sink downstream consumers read from.
pub trait ResultSink: Send + Sync + 'static {
    fn save(
        &self,
        site_id: &str,
        result: &ScrapeResult,
    ) -> impl Future<Output = Result<SavedResult, AppError>> + Send;
}

/// Outbound notification events.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notification {
    NewContent {
        site_id: String,
        url: String,
        content_hash: String,
    },
    Error {
        site_id: String,
        url: String,
        error: String,
    },
}

pub trait Notifier: Send + Sync + 'static {
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
