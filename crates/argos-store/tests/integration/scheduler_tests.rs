use std::time::Duration;

use argos_core::job::SchedulerConfig;
use argos_core::testutil::{MockNotifier, MockScraper, make_registration};
use argos_core::traits::RegistrationStore;
use argos_core::Scheduler;
use argos_store::JsonRegistrationStore;

use crate::integration::common::setup_store;

#[tokio::test]
async fn scheduled_run_persists_results_and_hash() {
    let (store, _dir) = setup_store().await;
    let reg = make_registration("events", "example.com")
        .with_target_urls(vec!["https://example.com/a".into(), "https://example.com/b".into()]);
    store.registrations().upsert(&reg).await.unwrap();

    let notifier = MockNotifier::new();
    let scheduler = Scheduler::new(
        MockScraper::new(),
        store.registrations(),
        store.results(),
        notifier.clone(),
        SchedulerConfig::default(),
    );

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.launched.len(), 1);
    assert!(scheduler.wait_idle(Duration::from_secs(5)).await);

    let today = chrono::Utc::now().date_naive();
    let files = store.results().list_day(today).await.unwrap();
    assert_eq!(files.len(), 2);
    let stored = store.results().read(&files[0]).await.unwrap();
    assert_eq!(stored.site_id, "events");
    assert!(stored.result.success);

    let reg = store.registrations().get("events").await.unwrap().unwrap();
    assert_eq!(reg.total_runs, 1);
    assert!(reg.last_content_hash.is_some());
    assert!(reg.next_check_at.is_some());
    assert_eq!(notifier.sent(), vec!["new_content:events".to_string()]);
}

#[tokio::test]
async fn failed_url_is_not_persisted() {
    let (store, _dir) = setup_store().await;
    let reg = make_registration("events", "example.com")
        .with_target_urls(vec!["https://example.com/ok".into(), "https://example.com/down".into()]);
    store.registrations().upsert(&reg).await.unwrap();

    let scheduler = Scheduler::new(
        MockScraper::new().failing_url("https://example.com/down"),
        store.registrations(),
        store.results(),
        MockNotifier::new(),
        SchedulerConfig::default(),
    );
    scheduler.run_once().await.unwrap();
    assert!(scheduler.wait_idle(Duration::from_secs(5)).await);

    let today = chrono::Utc::now().date_naive();
    assert_eq!(store.results().list_day(today).await.unwrap().len(), 1);

    let status = scheduler.status().await;
    let summary = status.recent_jobs[0].results.as_ref().unwrap();
    assert_eq!(summary.errors_encountered, 1);
}

#[tokio::test]
async fn disable_during_running_job_is_kept() {
    let (store, _dir) = setup_store().await;
    store
        .registrations()
        .upsert(&make_registration("events", "example.com"))
        .await
        .unwrap();

    let scraper = MockScraper::gated();
    let scheduler = Scheduler::new(
        scraper.clone(),
        store.registrations(),
        store.results(),
        MockNotifier::new(),
        SchedulerConfig::default(),
    );
    assert_eq!(scheduler.run_once().await.unwrap().launched.len(), 1);

    // A separate handle on the same file, as the CLI would open.
    let operator = JsonRegistrationStore::open(store.config().registrations_path())
        .await
        .unwrap();
    assert!(operator.set_enabled("events", false).await.unwrap());

    scraper.release(1);
    assert!(scheduler.wait_idle(Duration::from_secs(5)).await);

    let reg = operator.get("events").await.unwrap().unwrap();
    assert!(!reg.site.enabled);
    assert_eq!(reg.total_runs, 1);
    assert!(reg.last_content_hash.is_some());
    assert!(reg.next_check_at.is_some());
}
