use argos_core::testutil::make_registration;
use argos_core::traits::RegistrationStore;
use argos_store::{JsonRegistrationStore, Store};

use crate::integration::common::setup_store;

#[tokio::test]
async fn registrations_survive_reopen() {
    let (store, _dir) = setup_store().await;
    let registrations = store.registrations();

    let mut reg = make_registration("events", "events.example.com")
        .with_target_urls(vec!["https://events.example.com/list".into()])
        .with_interval_days(3);
    reg.last_content_hash = Some("abc123".into());
    registrations.upsert(&reg).await.unwrap();
    registrations
        .upsert(&make_registration("news", "news.example.com"))
        .await
        .unwrap();

    let reopened = JsonRegistrationStore::open(store.config().registrations_path())
        .await
        .unwrap();
    let all = reopened.list().await.unwrap();
    assert_eq!(all.len(), 2);

    let events = reopened.get("events").await.unwrap().unwrap();
    assert_eq!(events, reg);
}

#[tokio::test]
async fn disable_is_persisted() {
    let (store, _dir) = setup_store().await;
    store
        .registrations()
        .upsert(&make_registration("events", "example.com"))
        .await
        .unwrap();
    assert!(store.registrations().set_enabled("events", false).await.unwrap());

    let reopened = Store::open(store.config().clone()).await.unwrap();
    let reg = reopened.registrations().get("events").await.unwrap().unwrap();
    assert!(!reg.site.enabled);
}

#[tokio::test]
async fn registrations_file_is_camel_case_json() {
    let (store, _dir) = setup_store().await;
    store
        .registrations()
        .upsert(&make_registration("events", "example.com"))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(store.config().registrations_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json[0]["site"]["id"], "events");
    assert_eq!(json[0]["checkIntervalDays"], 1);
    assert_eq!(json[0]["consecutiveFailures"], 0);
}
