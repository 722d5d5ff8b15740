use axum::http::StatusCode;
use serde_json::json;

use crate::integration::common::{RATE_LIMIT, json_body, request, send, setup_test_app};

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app();

    let response = send(&app.router, request("GET", "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["schedulerRunning"], false);
}

#[tokio::test]
async fn scrape_configured_site() {
    let app = setup_test_app();

    let response = send(
        &app.router,
        request("POST", "/scrape", Some(json!({ "url": "https://example.com/" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["title"], "Example Domain");
    assert_eq!(json["metadata"]["siteId"], "example");
    assert_eq!(json["metadata"]["robotsTxtChecked"], true);
    assert_eq!(app.launcher.launch_count(), 1);
}

#[tokio::test]
async fn second_scrape_is_served_from_cache() {
    let app = setup_test_app();
    let body = json!({ "url": "https://example.com/" });

    send(&app.router, request("POST", "/scrape", Some(body.clone()))).await;
    let json = json_body(send(&app.router, request("POST", "/scrape", Some(body))).await).await;

    assert_eq!(json["metadata"]["cacheUsed"], true);
    assert_eq!(app.launcher.launch_count(), 1);

    let stats = json_body(send(&app.router, request("GET", "/scrape/cache/stats", None)).await).await;
    assert_eq!(stats["entries"], 1);
    assert_eq!(stats["hits"], 1);
}

#[tokio::test]
async fn huge_cache_ttl_is_accepted_and_cached() {
    let app = setup_test_app();
    let body = json!({
        "url": "https://example.com/",
        "options": { "cacheTtlSecs": u64::MAX }
    });

    let response = send(&app.router, request("POST", "/scrape", Some(body.clone()))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["success"], true);

    let json = json_body(send(&app.router, request("POST", "/scrape", Some(body))).await).await;
    assert_eq!(json["metadata"]["cacheUsed"], true);
    assert_eq!(app.launcher.launch_count(), 1);
}

#[tokio::test]
async fn scrape_without_configuration_is_a_failed_result() {
    let app = setup_test_app();

    let response = send(
        &app.router,
        request("POST", "/scrape", Some(json!({ "url": "https://unknown.test/page" }))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["errorKind"], "configuration_missing");
    assert_eq!(app.launcher.launch_count(), 0);
}

#[tokio::test]
async fn scrape_empty_url_returns_400() {
    let app = setup_test_app();

    let response = send(&app.router, request("POST", "/scrape", Some(json!({ "url": "  " })))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn extractor_override_replaces_site_extractors() {
    let app = setup_test_app();

    let response = send(
        &app.router,
        request(
            "POST",
            "/scrape",
            Some(json!({
                "url": "https://example.com/",
                "extractors": [{ "name": "heading", "selector": "h1" }],
                "options": { "useCache": false }
            })),
        ),
    )
    .await;

    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["heading"], "Example Domain");
    assert!(json["data"].get("title").is_none());
}

#[tokio::test]
async fn duplicate_extractor_override_is_a_validation_failure() {
    let app = setup_test_app();

    let response = send(
        &app.router,
        request(
            "POST",
            "/scrape",
            Some(json!({
                "url": "https://example.com/",
                "extractors": [
                    { "name": "heading", "selector": "h1" },
                    { "name": "heading", "selector": "p" }
                ]
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["errorKind"], "validation_error");
    assert_eq!(app.launcher.launch_count(), 0);
}

#[tokio::test]
async fn clear_cache_single_url_and_all() {
    let app = setup_test_app();
    send(
        &app.router,
        request("POST", "/scrape", Some(json!({ "url": "https://example.com/" }))),
    )
    .await;

    let response = send(
        &app.router,
        request("DELETE", "/scrape/cache?url=https://example.com/", None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["cleared"], true);
    assert_eq!(json["url"], "https://example.com/");

    let response = send(&app.router, request("DELETE", "/scrape/cache", None)).await;
    let json = json_body(response).await;
    assert!(json.get("url").is_none());

    let stats = json_body(send(&app.router, request("GET", "/scrape/cache/stats", None)).await).await;
    assert_eq!(stats["entries"], 0);
}

#[tokio::test]
async fn scheduler_start_status_stop() {
    let app = setup_test_app();

    let json = json_body(send(&app.router, request("POST", "/scheduler/start", None)).await).await;
    assert_eq!(json["started"], true);
    assert_eq!(json["running"], true);

    let json = json_body(send(&app.router, request("POST", "/scheduler/start", None)).await).await;
    assert_eq!(json["started"], false);

    let json = json_body(send(&app.router, request("GET", "/scheduler/status", None)).await).await;
    assert_eq!(json["running"], true);
    assert_eq!(json["maxConcurrentJobs"], 3);

    let json = json_body(send(&app.router, request("POST", "/scheduler/stop", None)).await).await;
    assert_eq!(json["wasRunning"], true);

    let json = json_body(send(&app.router, request("GET", "/scheduler/status", None)).await).await;
    assert_eq!(json["running"], false);
}

#[tokio::test]
async fn list_and_reload_sites() {
    let app = setup_test_app();

    let json = json_body(send(&app.router, request("GET", "/sites", None)).await).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["sites"][0]["id"], "example");
    assert_eq!(json["sites"][0]["extractorCount"], 1);

    let json = json_body(send(&app.router, request("POST", "/sites/reload", None)).await).await;
    assert_eq!(json["loaded"], 1);
}

#[tokio::test]
async fn scrape_is_rate_limited_per_client() {
    let app = setup_test_app();
    let body = json!({ "url": "https://example.com/" });

    for _ in 0..RATE_LIMIT {
        let response = send(&app.router, request("POST", "/scrape", Some(body.clone()))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app.router, request("POST", "/scrape", Some(body))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other routes are not limited.
    let response = send(&app.router, request("GET", "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
