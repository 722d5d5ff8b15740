/// Smoke-test for the Chromium engine.
///
/// Launches a headless Chromium, scrapes <https://example.com> through the
/// full orchestrator (robots.txt, politeness, instructions, extraction) and
/// checks the `<h1>` came back.
///
/// Run with:
///   cargo run -p argos-client --example browser_smoke --features browser
use argos_client::{ChromiumLauncher, ReqwestRobotsPolicy};
use argos_core::models::{BrowserOptions, Extractor, SiteConfig};
use argos_core::result::ScrapeRequest;
use argos_core::{ScrapeService, StaticSites};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let site = SiteConfig {
        id: "example".into(),
        name: "Example Domain".into(),
        domain: "example.com".into(),
        url_patterns: Vec::new(),
        instructions: Vec::new(),
        extractors: vec![
            Extractor::text("title", "h1").required(),
            Extractor::text("links", "a").attribute("href").multiple(),
        ],
        options: BrowserOptions::default(),
        enabled: true,
        version: "1.0.0".into(),
        updated_at: None,
    };

    let service = ScrapeService::new(
        ChromiumLauncher::new(),
        ReqwestRobotsPolicy::new()?,
        StaticSites::new(vec![site]),
    );

    println!("Scraping https://example.com …");
    let result = service
        .execute(&ScrapeRequest::new("https://example.com"))
        .await;

    anyhow::ensure!(result.success, "scrape failed: {:?}", result.errors);
    anyhow::ensure!(
        result.data.get("title").and_then(|v| v.as_str()) == Some("Example Domain"),
        "unexpected title: {:?}",
        result.data.get("title")
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
