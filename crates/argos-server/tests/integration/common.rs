use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use tower::ServiceExt;

use argos_core::models::Extractor;
use argos_core::testutil::{
    MockLauncher, MockNotifier, MockPage, MockRegistrationStore, MockResultSink, MockRobots,
    make_site,
};
use argos_core::{Scheduler, SchedulerConfig, ScrapeService, StaticSites};
use argos_server::routes;
use argos_server::state::{AppState, Services};

pub const RATE_LIMIT: u32 = 10;

/// Scripted browser, allow-all robots, one configured site for `example.com`.
pub struct Mocked;

impl Services for Mocked {
    type Launcher = MockLauncher;
    type Robots = MockRobots;
    type Sites = StaticSites;
    type Registrations = MockRegistrationStore;
    type Sink = MockResultSink;
    type Notifier = MockNotifier;
}

pub struct TestApp {
    pub router: Router,
    pub launcher: MockLauncher,
}

pub fn setup_test_app() -> TestApp {
    let page = MockPage::new().with_text("h1", &["Example Domain"]);
    let launcher = MockLauncher::new(page);

    let mut site = make_site("example", "example.com");
    site.extractors.push(Extractor::text("title", "h1"));

    let scraper = ScrapeService::new(
        launcher.clone(),
        MockRobots::allow(),
        StaticSites::new(vec![site]),
    );
    let scheduler = Scheduler::new(
        scraper.clone(),
        MockRegistrationStore::new(Vec::new()),
        MockResultSink::new(),
        MockNotifier::new(),
        SchedulerConfig::default(),
    );

    let state = Arc::new(AppState::<Mocked>::new(scraper, scheduler));
    let router = routes::router(state, RATE_LIMIT).unwrap();

    TestApp { router, launcher }
}

/// Requests carry a peer address, as they do when served with connect info.
pub fn request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
