//! Periodic, bounded-concurrency re-scraping of registered sites.
//!
//! A tick lists registrations, filters the due ones and launches a job per
//! site while fewer than `max_concurrent_jobs` are in flight. Sites over the
//! cap are left untouched and picked up by a later tick. Each job scrapes its
//! site's URLs one after another, persists successful results, updates the
//! registration's schedule and reports new content by hash comparison.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{Job, JobStatus, JobSummary, ScheduleUpdate, SchedulerConfig, SiteRegistration};
use crate::models::content_hash;
use crate::result::ScrapeRequest;
use crate::traits::{Notification, Notifier, RegistrationStore, ResultSink, Scraper};

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started {
        interval: Duration,
        max_concurrent_jobs: usize,
    },
    Tick {
        due: usize,
        running: usize,
    },
    JobLaunched {
        job_id: Uuid,
        site_id: &'a str,
    },
    JobDeferred {
        site_id: &'a str,
    },
    UrlFailed {
        job_id: Uuid,
        url: &'a str,
        error: &'a str,
    },
    NewContent {
        site_id: &'a str,
        content_hash: &'a str,
    },
    JobFinished {
        job_id: Uuid,
        site_id: &'a str,
        status: JobStatus,
        summary: &'a JobSummary,
    },
    Stopping {
        in_flight: usize,
    },
    JobAbandoned {
        job_id: Uuid,
        site_id: &'a str,
    },
    Stopped,
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync + 'static {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started {
                interval,
                max_concurrent_jobs,
            } => {
                tracing::info!(
                    interval_secs = interval.as_secs(),
                    max_concurrent_jobs,
                    "Scheduler started"
                );
            }
            SchedulerEvent::Tick { due, running } => {
                tracing::info!(due, running, "Scheduler tick");
            }
            SchedulerEvent::JobLaunched { job_id, site_id } => {
                tracing::info!(%job_id, %site_id, "Job launched");
            }
            SchedulerEvent::JobDeferred { site_id } => {
                tracing::info!(%site_id, "Concurrency cap reached, site deferred");
            }
            SchedulerEvent::UrlFailed { job_id, url, error } => {
                tracing::warn!(%job_id, %url, %error, "URL failed");
            }
            SchedulerEvent::NewContent {
                site_id,
                content_hash,
            } => {
                tracing::info!(%site_id, content_hash = %&content_hash[..8.min(content_hash.len())], "New content");
            }
            SchedulerEvent::JobFinished {
                job_id,
                site_id,
                status,
                summary,
            } => {
                tracing::info!(
                    %job_id,
                    %site_id,
                    %status,
                    urls = summary.urls_scraped,
                    items = summary.items_extracted,
                    errors = summary.errors_encountered,
                    "Job finished"
                );
            }
            SchedulerEvent::Stopping { in_flight } => {
                tracing::info!(in_flight, "Scheduler stopping");
            }
            SchedulerEvent::JobAbandoned { job_id, site_id } => {
                tracing::warn!(%job_id, %site_id, "Job abandoned after grace period");
            }
            SchedulerEvent::Stopped => {
                tracing::info!("Scheduler stopped");
            }
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub due: usize,
    pub launched: Vec<Uuid>,
    /// Due sites left for a later tick because the cap was reached.
    pub deferred: Vec<String>,
    /// Due sites skipped because a job for them is still running.
    pub already_running: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub was_running: bool,
    pub drained: usize,
    pub abandoned: usize,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub running_jobs: Vec<Job>,
    pub recent_jobs: Vec<Job>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
    pub interval_secs: u64,
    pub max_concurrent_jobs: usize,
}

struct RunningJob {
    job: Job,
    cancel: CancellationToken,
    // Held so the task is owned by the scheduler; never joined.
    _handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    loop_cancel: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
    running: HashMap<Uuid, RunningJob>,
    history: VecDeque<Job>,
    last_tick_at: Option<DateTime<Utc>>,
    next_tick_at: Option<DateTime<Utc>>,
}

impl State {
    fn record(&mut self, job: Job, limit: usize) {
        self.history.push_front(job);
        self.history.truncate(limit);
    }
}

struct Inner<S, R, K, N> {
    scraper: S,
    registrations: R,
    sink: K,
    notifier: N,
    config: SchedulerConfig,
    reporter: Arc<dyn SchedulerReporter>,
    state: Mutex<State>,
    job_done: Notify,
}

/// The scheduling service. Cloning shares one scheduler.
pub struct Scheduler<S, R, K, N> {
    inner: Arc<Inner<S, R, K, N>>,
}

impl<S, R, K, N> Clone for Scheduler<S, R, K, N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, R, K, N> Scheduler<S, R, K, N>
where
    S: Scraper,
    R: RegistrationStore,
    K: ResultSink,
    N: Notifier,
{
    pub fn new(scraper: S, registrations: R, sink: K, notifier: N, config: SchedulerConfig) -> Self {
        Self::with_reporter(
            scraper,
            registrations,
            sink,
            notifier,
            config,
            Arc::new(TracingSchedulerReporter),
        )
    }

    pub fn with_reporter(
        scraper: S,
        registrations: R,
        sink: K,
        notifier: N,
        config: SchedulerConfig,
        reporter: Arc<dyn SchedulerReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                scraper,
                registrations,
                sink,
                notifier,
                config,
                reporter,
                state: Mutex::new(State::default()),
                job_done: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn registrations(&self) -> &R {
        &self.inner.registrations
    }

    /// Start the periodic loop: one tick now, then one per interval.
    /// Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.loop_cancel.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let scheduler = self.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { scheduler.run_loop(loop_token).await });

        state.loop_cancel = Some(token);
        state.loop_handle = Some(handle);

        self.inner.reporter.report(SchedulerEvent::Started {
            interval: self.inner.config.interval,
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
        });
        true
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }

            let interval = self.inner.config.interval;
            self.inner.state.lock().await.next_tick_at = chrono::TimeDelta::from_std(interval)
                .ok()
                .map(|delta| Utc::now() + delta);

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = cancel.cancelled() => break,
            }
        }
    }

    /// Stop the loop, wait up to the grace period for in-flight jobs, then
    /// abandon whatever is left. Abandoned jobs have their cancellation
    /// token fired and are recorded as cancelled.
    pub async fn stop(&self) -> StopReport {
        let (token, handle) = {
            let mut state = self.inner.state.lock().await;
            (state.loop_cancel.take(), state.loop_handle.take())
        };
        let Some(token) = token else {
            return StopReport::default();
        };

        token.cancel();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Scheduler loop ended abnormally");
        }
        {
            let mut state = self.inner.state.lock().await;
            state.next_tick_at = None;
        }

        let in_flight = self.running_count().await;
        self.inner
            .reporter
            .report(SchedulerEvent::Stopping { in_flight });

        self.wait_idle(self.inner.config.shutdown_grace).await;
        let abandoned = self.abandon_running().await;

        self.inner.reporter.report(SchedulerEvent::Stopped);
        StopReport {
            was_running: true,
            drained: in_flight.saturating_sub(abandoned),
            abandoned,
        }
    }

    /// Wait until no job is in flight or `limit` elapses. Returns whether idle.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notified = self.inner.job_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.running_count().await == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.running_count().await == 0;
            }
        }
    }

    async fn abandon_running(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let leftovers: Vec<RunningJob> = state.running.drain().map(|(_, job)| job).collect();
        let count = leftovers.len();

        for running in leftovers {
            running.cancel.cancel();
            let mut job = running.job;
            job.errors
                .push("abandoned after shutdown grace period".to_string());
            job.finish(JobStatus::Cancelled);
            self.inner.reporter.report(SchedulerEvent::JobAbandoned {
                job_id: job.id,
                site_id: &job.site_id,
            });
            state.record(job, self.inner.config.history_limit);
        }
        count
    }

    async fn running_count(&self) -> usize {
        self.inner.state.lock().await.running.len()
    }

    /// Run a single tick outside the periodic loop.
    pub async fn run_once(&self) -> Result<TickReport, AppError> {
        self.tick().await
    }

    async fn tick(&self) -> Result<TickReport, AppError> {
        let now = Utc::now();
        let mut due: Vec<SiteRegistration> = self
            .inner
            .registrations
            .list()
            .await?
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.next_check_at.cmp(&b.next_check_at))
        });

        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        let mut state = self.inner.state.lock().await;
        state.last_tick_at = Some(now);
        self.inner.reporter.report(SchedulerEvent::Tick {
            due: due.len(),
            running: state.running.len(),
        });

        for registration in due {
            let site_id = registration.id().to_string();

            if state.running.values().any(|r| r.job.site_id == site_id) {
                report.already_running.push(site_id);
                continue;
            }
            if state.running.len() >= self.inner.config.max_concurrent_jobs {
                self.inner
                    .reporter
                    .report(SchedulerEvent::JobDeferred { site_id: &site_id });
                report.deferred.push(site_id);
                continue;
            }

            let mut job = Job::new(&site_id);
            job.start();
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_job(
                Arc::clone(&self.inner),
                job.clone(),
                registration,
                cancel.clone(),
            ));

            self.inner.reporter.report(SchedulerEvent::JobLaunched {
                job_id: job.id,
                site_id: &site_id,
            });
            report.launched.push(job.id);
            state.running.insert(
                job.id,
                RunningJob {
                    job,
                    cancel,
                    _handle: handle,
                },
            );
        }

        Ok(report)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock().await;
        let mut running_jobs: Vec<Job> = state.running.values().map(|r| r.job.clone()).collect();
        running_jobs.sort_by_key(|j| j.created_at);

        SchedulerStatus {
            running: state.loop_cancel.is_some(),
            running_jobs,
            recent_jobs: state.history.iter().cloned().collect(),
            last_tick_at: state.last_tick_at,
            next_tick_at: state.next_tick_at,
            interval_secs: self.inner.config.interval.as_secs(),
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
        }
    }
}

async fn run_job<S, R, K, N>(
    inner: Arc<Inner<S, R, K, N>>,
    mut job: Job,
    mut registration: SiteRegistration,
    cancel: CancellationToken,
) where
    S: Scraper,
    R: RegistrationStore,
    K: ResultSink,
    N: Notifier,
{
    let site_id = registration.id().to_string();

    registration.mark_started(Utc::now());
    record_schedule(&inner.registrations, &mut job, &registration).await;

    let watchdog = inner.config.job_timeout.map(|limit| {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(limit) => {
                    tracing::warn!(timeout_secs = limit.as_secs(), "Job watchdog fired");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        })
    });

    let mut summary = JobSummary::default();
    let mut payload = serde_json::Map::new();
    let mut first_success: Option<String> = None;

    for url in registration.urls() {
        job.log(format!("scraping {url}"));
        let request = ScrapeRequest::new(&url).without_cache();
        let result = inner.scraper.scrape(request, cancel.clone()).await;
        summary.urls_scraped += 1;

        if result.success {
            summary.items_extracted += result.item_count();
            payload.insert(url.clone(), serde_json::Value::Object(result.data.clone()));
            first_success.get_or_insert_with(|| url.clone());

            match inner.sink.save(&site_id, &result).await {
                Ok(saved) => job.log(format!("saved {}", saved.filename)),
                Err(e) => {
                    summary.errors_encountered += 1;
                    job.errors.push(format!("{url}: {e}"));
                }
            }
        } else {
            let error = result.errors.join("; ");
            summary.errors_encountered += 1;
            inner.reporter.report(SchedulerEvent::UrlFailed {
                job_id: job.id,
                url: &url,
                error: &error,
            });

            if registration.notifications.on_error {
                send(
                    &inner.notifier,
                    &Notification::Error {
                        site_id: site_id.clone(),
                        url: url.clone(),
                        error: error.clone(),
                    },
                )
                .await;
            }
            job.errors.push(format!("{url}: {error}"));
        }
    }

    let success = first_success.is_some();
    if let Some(url) = first_success {
        let hash = content_hash(&serde_json::Value::Object(payload));
        let is_new = registration.last_content_hash.as_deref() != Some(hash.as_str());
        summary.new_content_found = is_new;
        summary.content_hash = Some(hash.clone());

        if is_new {
            inner.reporter.report(SchedulerEvent::NewContent {
                site_id: &site_id,
                content_hash: &hash,
            });
            if registration.notifications.on_new_content {
                send(
                    &inner.notifier,
                    &Notification::NewContent {
                        site_id: site_id.clone(),
                        url,
                        content_hash: hash.clone(),
                    },
                )
                .await;
            }
            registration.last_content_hash = Some(hash);
        }
    }

    registration.mark_finished(Utc::now(), success);
    record_schedule(&inner.registrations, &mut job, &registration).await;

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    job.results = Some(summary);
    job.finish(if success {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    });

    if let Some(results) = &job.results {
        inner.reporter.report(SchedulerEvent::JobFinished {
            job_id: job.id,
            site_id: &site_id,
            status: job.status,
            summary: results,
        });
    }

    {
        let mut state = inner.state.lock().await;
        if state.running.remove(&job.id).is_some() {
            state.record(job, inner.config.history_limit);
        } else {
            tracing::debug!(job_id = %job.id, "Abandoned job finished late");
        }
    }
    inner.job_done.notify_waiters();
}

async fn record_schedule<R: RegistrationStore>(
    store: &R,
    job: &mut Job,
    registration: &SiteRegistration,
) {
    let site_id = registration.id();
    match store
        .record_schedule(site_id, &ScheduleUpdate::from(registration))
        .await
    {
        Ok(true) => {}
        Ok(false) => tracing::warn!(site_id, "Registration removed while its job ran"),
        Err(e) => {
            tracing::error!(site_id, error = %e, "Failed to persist schedule update");
            job.errors.push(format!("registration update failed: {e}"));
        }
    }
}

async fn send<N: Notifier>(notifier: &N, notification: &Notification) {
    if let Err(e) = notifier.notify(notification).await {
        tracing::warn!(error = %e, "Notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use chrono::TimeDelta;

    type TestScheduler =
        Scheduler<MockScraper, MockRegistrationStore, MockResultSink, MockNotifier>;

    struct Harness {
        scheduler: TestScheduler,
        scraper: MockScraper,
        store: MockRegistrationStore,
        sink: MockResultSink,
        notifier: MockNotifier,
        reporter: Arc<MockReporter>,
    }

    fn harness(scraper: MockScraper, registrations: Vec<SiteRegistration>, config: SchedulerConfig) -> Harness {
        let store = MockRegistrationStore::new(registrations);
        let sink = MockResultSink::new();
        let notifier = MockNotifier::new();
        let reporter = Arc::new(MockReporter::new());
        let scheduler = Scheduler::with_reporter(
            scraper.clone(),
            store.clone(),
            sink.clone(),
            notifier.clone(),
            config,
            reporter.clone(),
        );
        Harness {
            scheduler,
            scraper,
            store,
            sink,
            notifier,
            reporter,
        }
    }

    fn sites(n: usize) -> Vec<SiteRegistration> {
        (0..n)
            .map(|i| make_registration(&format!("site-{i}"), &format!("site{i}.example.com")))
            .collect()
    }

    #[tokio::test]
    async fn tick_respects_concurrency_cap() {
        let h = harness(
            MockScraper::gated(),
            sites(5),
            SchedulerConfig::default().with_max_concurrent_jobs(3),
        );

        let report = h.scheduler.run_once().await.unwrap();
        assert_eq!(report.due, 5);
        assert_eq!(report.launched.len(), 3);
        assert_eq!(report.deferred.len(), 2);

        let status = h.scheduler.status().await;
        assert_eq!(status.running_jobs.len(), 3);
        assert!(status.running_jobs.iter().all(|j| j.status == JobStatus::Running));

        for site_id in &report.deferred {
            let reg = h.store.get(site_id).await.unwrap().unwrap();
            assert_eq!(reg.next_check_at, None, "deferred sites keep their due time");
            assert_eq!(reg.total_runs, 0);
        }

        h.scraper.release(10);
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(h.scheduler.status().await.recent_jobs.len(), 3);
    }

    #[tokio::test]
    async fn sites_already_running_are_not_launched_twice() {
        let h = harness(MockScraper::gated(), sites(1), SchedulerConfig::default());

        let first = h.scheduler.run_once().await.unwrap();
        let second = h.scheduler.run_once().await.unwrap();
        assert_eq!(first.launched.len(), 1);
        assert!(second.launched.is_empty());
        assert_eq!(second.already_running, vec!["site-0".to_string()]);

        h.scraper.release(10);
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn disable_during_job_survives_schedule_write() {
        let h = harness(MockScraper::gated(), sites(1), SchedulerConfig::default());

        h.scheduler.run_once().await.unwrap();
        h.store.set_enabled("site-0", false);
        h.scraper.release(1);
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        let reg = h.store.get("site-0").await.unwrap().unwrap();
        assert!(!reg.site.enabled);
        assert_eq!(reg.total_runs, 1);
        assert!(reg.next_check_at.is_some());
    }

    #[tokio::test]
    async fn successful_job_updates_schedule_and_persists() {
        let reg = make_registration("events", "example.com")
            .with_target_urls(vec!["https://example.com/a".into(), "https://example.com/b".into()]);
        let h = harness(MockScraper::new(), vec![reg], SchedulerConfig::default());

        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        let requests = h.scraper.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| !r.options.use_cache));
        assert_eq!(requests[0].url, "https://example.com/a");
        assert_eq!(requests[1].url, "https://example.com/b");

        let reg = h.store.get("events").await.unwrap().unwrap();
        assert_eq!(reg.total_runs, 1);
        assert_eq!(reg.consecutive_failures, 0);
        assert!(reg.last_success_at.is_some());
        assert!(reg.last_content_hash.is_some());
        let next = reg.next_check_at.unwrap();
        let expected = reg.last_checked_at.unwrap() + TimeDelta::days(1);
        assert!((next - expected).num_seconds().abs() < 5);

        assert_eq!(h.sink.saved().len(), 2);

        let job = &h.scheduler.status().await.recent_jobs[0];
        assert_eq!(job.status, JobStatus::Completed);
        let summary = job.results.as_ref().unwrap();
        assert_eq!(summary.urls_scraped, 2);
        assert!(summary.new_content_found);
        assert_eq!(
            h.notifier.sent(),
            vec!["new_content:events".to_string()]
        );
    }

    #[tokio::test]
    async fn unchanged_content_is_not_new() {
        let h = harness(MockScraper::new(), vec![make_registration("events", "example.com")], SchedulerConfig::default());
        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        // Make the site due again with the stored hash in place.
        let mut reg = h.store.get("events").await.unwrap().unwrap();
        reg.next_check_at = None;
        h.store.upsert(&reg).await.unwrap();

        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        let status = h.scheduler.status().await;
        let latest = status.recent_jobs[0].results.as_ref().unwrap();
        assert!(!latest.new_content_found);
        assert_eq!(h.notifier.sent().len(), 1, "only the first run notifies");
    }

    #[tokio::test]
    async fn url_failure_does_not_abort_job() {
        let reg = make_registration("events", "example.com").with_target_urls(vec![
            "https://example.com/broken".into(),
            "https://example.com/ok".into(),
        ]);
        let scraper = MockScraper::new().failing_url("https://example.com/broken");
        let h = harness(scraper, vec![reg], SchedulerConfig::default());

        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        let job = &h.scheduler.status().await.recent_jobs[0];
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.as_ref().unwrap().errors_encountered, 1);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(h.scraper.requests().len(), 2);
    }

    #[tokio::test]
    async fn sink_failure_is_recorded_on_the_job() {
        let store = MockRegistrationStore::new(vec![make_registration("events", "example.com")]);
        let scheduler = Scheduler::new(
            MockScraper::new(),
            store.clone(),
            MockResultSink::with_error("disk full"),
            MockNotifier::new(),
            SchedulerConfig::default(),
        );

        scheduler.run_once().await.unwrap();
        assert!(scheduler.wait_idle(Duration::from_secs(5)).await);

        let job = &scheduler.status().await.recent_jobs[0];
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.as_ref().unwrap().errors_encountered, 1);
        assert!(job.errors[0].contains("disk full"));
    }

    #[tokio::test]
    async fn failed_job_increments_streak_without_backoff() {
        let mut reg = make_registration("events", "example.com").with_interval_days(2);
        reg.notifications.on_error = true;
        reg.consecutive_failures = 4;
        let scraper = MockScraper::new().failing_url("https://example.com/");
        let h = harness(scraper, vec![reg], SchedulerConfig::default());

        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        let reg = h.store.get("events").await.unwrap().unwrap();
        assert_eq!(reg.consecutive_failures, 5);
        assert!(reg.site.enabled, "failures never disable a site");
        let expected = reg.last_checked_at.unwrap() + TimeDelta::days(2);
        assert!((reg.next_check_at.unwrap() - expected).num_seconds().abs() < 5);

        let job = &h.scheduler.status().await.recent_jobs[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(h.sink.saved().is_empty());
        assert_eq!(h.notifier.sent(), vec!["error:events".to_string()]);
    }

    #[tokio::test]
    async fn disabled_and_future_sites_are_not_due() {
        let mut disabled = make_registration("off", "off.example.com");
        disabled.site.enabled = false;
        let mut later = make_registration("later", "later.example.com");
        later.next_check_at = Some(Utc::now() + TimeDelta::hours(3));

        let h = harness(MockScraper::new(), vec![disabled, later], SchedulerConfig::default());
        let report = h.scheduler.run_once().await.unwrap();
        assert_eq!(report.due, 0);
        assert!(report.launched.is_empty());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_drains() {
        let h = harness(
            MockScraper::new(),
            sites(2),
            SchedulerConfig::default().with_shutdown_grace(Duration::from_secs(5)),
        );

        assert!(h.scheduler.start().await);
        assert!(!h.scheduler.start().await);
        assert!(h.scheduler.status().await.running);

        // The immediate tick runs both sites.
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.scraper.requests().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let report = h.scheduler.stop().await;
        assert!(report.was_running);
        assert_eq!(report.abandoned, 0);

        let status = h.scheduler.status().await;
        assert!(!status.running);
        assert!(status.running_jobs.is_empty());
        assert!(h.reporter.events().contains(&"stopped".to_string()));

        assert_eq!(h.scheduler.stop().await, StopReport::default());
    }

    #[tokio::test]
    async fn stop_abandons_jobs_after_grace() {
        let h = harness(
            MockScraper::gated(),
            sites(1),
            SchedulerConfig::default().with_shutdown_grace(Duration::from_millis(50)),
        );

        assert!(h.scheduler.start().await);
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.scheduler.status().await.running_jobs.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let report = h.scheduler.stop().await;
        assert_eq!(report.abandoned, 1);

        let status = h.scheduler.status().await;
        assert!(status.running_jobs.is_empty());
        assert_eq!(status.recent_jobs[0].status, JobStatus::Cancelled);
        assert!(h.reporter.events().contains(&"abandoned:site-0".to_string()));
    }

    #[tokio::test]
    async fn watchdog_cancels_stuck_job() {
        let h = harness(
            MockScraper::gated(),
            sites(1),
            SchedulerConfig::default().with_job_timeout(Some(Duration::from_millis(50))),
        );

        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        let job = &h.scheduler.status().await.recent_jobs[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.errors[0].contains("Cancelled"));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let mut config = SchedulerConfig::default();
        config.history_limit = 2;
        let h = harness(MockScraper::new(), sites(4), config);

        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);
        h.scheduler.run_once().await.unwrap();
        assert!(h.scheduler.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(h.scheduler.status().await.recent_jobs.len(), 2);
    }
}
