pub mod cache;
pub mod engine;
pub mod error;
pub mod frames;
pub mod job;
pub mod models;
pub mod notify;
pub mod result;
pub mod scheduler;
pub mod scrape;
pub mod sites;
pub mod throttle;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cache::{CacheStats, ResultCache};
pub use error::AppError;
pub use job::{Job, JobStatus, JobSummary, ScheduleUpdate, SchedulerConfig, SiteRegistration};
pub use models::{
    Action, BrowserOptions, ExtractedData, Extractor, Instruction, SiteConfig, compute_hash,
    content_hash,
};
pub use result::{RobotsStatus, RobotsVerdict, ScrapeMetadata, ScrapeOptions, ScrapeRequest, ScrapeResult};
pub use scheduler::{Scheduler, SchedulerStatus, TracingSchedulerReporter};
pub use scrape::{ScrapeService, ScrapeServiceConfig};
pub use sites::{SiteConfigLoader, StaticSites};
pub use traits::{
    Browser, BrowserLauncher, Document, Frame, Notification, Notifier, Page, RegistrationStore,
    ResultSink, RobotsPolicy, SavedResult, Scraper, SiteConfigSource,
};
