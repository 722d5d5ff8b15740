use std::sync::{Arc, RwLock};
use std::time::Duration;

use argos_core::error::AppError;
use argos_core::models::BrowserOptions;
use argos_core::traits::{Browser, BrowserLauncher, Document, Frame, Page};
use reqwest::Client;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use url::Url;

use crate::DEFAULT_USER_AGENT;

/// Page engine for sites that render server-side.
///
/// Fetches HTML with reqwest and queries it with CSS selectors. There is no
/// JavaScript: `click` and `type` fail, waits resolve against the static
/// document, and iframes are followed by fetching their `src`.
#[derive(Clone)]
pub struct HttpLauncher {
    client: Client,
}

impl HttpLauncher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::BrowserLaunchFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

impl BrowserLauncher for HttpLauncher {
    type Browser = HttpBrowser;

    async fn launch(&self, _options: &BrowserOptions) -> Result<HttpBrowser, AppError> {
        Ok(HttpBrowser {
            client: self.client.clone(),
        })
    }
}

pub struct HttpBrowser {
    client: Client,
}

impl Browser for HttpBrowser {
    type Page = HttpPage;

    async fn new_page(&self, options: &BrowserOptions) -> Result<HttpPage, AppError> {
        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        Ok(HttpPage {
            fetcher: Fetcher {
                client: self.client.clone(),
                user_agent,
            },
            current: Arc::new(RwLock::new(None)),
        })
    }

    async fn close(self) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Clone)]
struct Fetcher {
    client: Client,
    user_agent: String,
}

impl Fetcher {
    async fn fetch(&self, url: &str) -> Result<HtmlDocument, AppError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::NetworkFetchFailed(format!("timed out fetching {url}"))
                } else {
                    AppError::NetworkFetchFailed(format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), %url, "Page request failed");
            return Err(AppError::NetworkFetchFailed(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }

        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| AppError::NetworkFetchFailed(format!("failed to read body: {e}")))?;
        Ok(HtmlDocument {
            url: final_url,
            html: html.into(),
        })
    }

    async fn frame_at(&self, url: &Url) -> Result<HttpFrame, AppError> {
        Ok(HttpFrame {
            fetcher: self.clone(),
            document: self.fetch(url.as_str()).await?,
        })
    }
}

/// Raw HTML plus the URL it was served from. Parsed per query because
/// `scraper::Html` is not `Send`.
#[derive(Debug, Clone)]
struct HtmlDocument {
    url: Url,
    html: Arc<str>,
}

impl HtmlDocument {
    fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        select_html(&self.html, selector, attribute, multiple)
    }
}

fn parse_selector(selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector)
        .map_err(|e| AppError::ExtractionFailed(format!("invalid selector '{selector}': {e}")))
}

/// Text content or attribute values of the first match, or of every match.
pub fn select_html(
    html: &str,
    selector: &str,
    attribute: Option<&str>,
    multiple: bool,
) -> Result<Vec<String>, AppError> {
    let parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let values = document.select(&parsed).map(|element| match attribute {
        Some(name) => element.value().attr(name).unwrap_or_default().to_string(),
        None => element.text().collect::<String>(),
    });
    Ok(if multiple {
        values.collect()
    } else {
        values.take(1).collect()
    })
}

/// Absolute http(s) URLs of every `iframe[src]` in `html`.
pub fn iframe_sources(html: &str, base: &Url) -> Vec<Url> {
    let Ok(parsed) = Selector::parse("iframe[src]") else {
        return Vec::new();
    };
    Html::parse_document(html)
        .select(&parsed)
        .filter_map(|element| element.value().attr("src"))
        .filter_map(|src| resolve_frame_src(base, src))
        .collect()
}

/// The `src` of the iframe matching `selector`, if the first match is one.
pub fn iframe_source(html: &str, base: &Url, selector: &str) -> Result<Option<Url>, AppError> {
    let parsed = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&parsed)
        .next()
        .filter(|element| element.value().name() == "iframe")
        .and_then(|element| element.value().attr("src"))
        .and_then(|src| resolve_frame_src(base, src)))
}

fn resolve_frame_src(base: &Url, src: &str) -> Option<Url> {
    base.join(src.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

pub struct HttpPage {
    fetcher: Fetcher,
    current: Arc<RwLock<Option<HtmlDocument>>>,
}

impl HttpPage {
    fn document(&self) -> Result<HtmlDocument, AppError> {
        self.current
            .read()
            .map_err(|_| AppError::ExtractionFailed("page state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| AppError::ExtractionFailed("no document loaded".to_string()))
    }

    fn unsupported(action: &str) -> AppError {
        AppError::ValidationError(format!("{action} requires the browser engine"))
    }
}

impl Document for HttpPage {
    type Frame = HttpFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        self.document()?.select(selector, attribute, multiple)
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<HttpFrame>, AppError> {
        let document = self.document()?;
        match iframe_source(&document.html, &document.url, selector)? {
            Some(src) => Ok(Some(self.fetcher.frame_at(&src).await?)),
            None => Ok(None),
        }
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        Ok(self
            .current
            .read()
            .ok()
            .and_then(|doc| doc.as_ref().map(|d| d.url.to_string())))
    }
}

impl Page for HttpPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        let document = self.fetcher.fetch(url).await?;
        let mut current = self
            .current
            .write()
            .map_err(|_| AppError::NetworkFetchFailed("page state poisoned".to_string()))?;
        *current = Some(document);
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<(), AppError> {
        Err(Self::unsupported("click"))
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> Result<(), AppError> {
        Err(Self::unsupported("type"))
    }

    async fn scroll(&self, _selector: Option<&str>) -> Result<(), AppError> {
        Ok(())
    }

    /// A static document never changes, so a missing selector fails at once.
    async fn wait_for_selector(&self, selector: &str) -> Result<(), AppError> {
        if self.document()?.select(selector, None, false)?.is_empty() {
            return Err(AppError::ExtractionFailed(format!(
                "'{selector}' is not present in the static document"
            )));
        }
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn wait_for_network_idle(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        Err(Self::unsupported("screenshot"))
    }

    async fn frames(&self) -> Result<Vec<HttpFrame>, AppError> {
        let document = self.document()?;
        let mut frames = Vec::new();
        for src in iframe_sources(&document.html, &document.url) {
            match self.fetcher.frame_at(&src).await {
                Ok(frame) => frames.push(frame),
                Err(e) => tracing::warn!(url = %src, error = %e, "Skipping unreachable iframe"),
            }
        }
        Ok(frames)
    }

    async fn memory_usage(&self) -> Result<Option<u64>, AppError> {
        Ok(None)
    }
}

#[derive(Clone)]
pub struct HttpFrame {
    fetcher: Fetcher,
    document: HtmlDocument,
}

impl Document for HttpFrame {
    type Frame = HttpFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        self.document.select(selector, attribute, multiple)
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<HttpFrame>, AppError> {
        match iframe_source(&self.document.html, &self.document.url, selector)? {
            Some(src) => Ok(Some(self.fetcher.frame_at(&src).await?)),
            None => Ok(None),
        }
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        Ok(Some(self.document.url.to_string()))
    }
}

impl Frame for HttpFrame {
    async fn wait_for_load(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <h1> City Events </h1>
          <ul>
            <li class="event"><a href="/e/1">Jazz night</a></li>
            <li class="event"><a href="/e/2">Book fair</a></li>
          </ul>
          <iframe id="calendar" src="/embed/calendar"></iframe>
          <iframe src="javascript:void(0)"></iframe>
          <iframe src="https://maps.example.org/map"></iframe>
        </body></html>
    "#;

    fn page_with(html: &str) -> HttpPage {
        HttpPage {
            fetcher: Fetcher {
                client: Client::new(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            current: Arc::new(RwLock::new(Some(HtmlDocument {
                url: Url::parse("https://events.example.com/list").unwrap(),
                html: html.into(),
            }))),
        }
    }

    #[test]
    fn test_select_first_text() {
        let values = select_html(LISTING, "h1", None, false).unwrap();
        assert_eq!(values, vec![" City Events "]);
    }

    #[test]
    fn test_select_multiple_attributes() {
        let values = select_html(LISTING, "li.event a", Some("href"), true).unwrap();
        assert_eq!(values, vec!["/e/1", "/e/2"]);
    }

    #[test]
    fn test_select_missing_attribute_is_empty_string() {
        let values = select_html(LISTING, "h1", Some("data-id"), false).unwrap();
        assert_eq!(values, vec![""]);
    }

    #[test]
    fn test_select_no_match() {
        assert!(select_html(LISTING, ".nothing", None, true).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_selector() {
        let err = select_html(LISTING, "li[", None, false).unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed(_)));
    }

    #[test]
    fn test_iframe_sources_resolve_and_filter() {
        let base = Url::parse("https://events.example.com/list").unwrap();
        let sources: Vec<String> = iframe_sources(LISTING, &base)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            sources,
            vec![
                "https://events.example.com/embed/calendar",
                "https://maps.example.org/map"
            ]
        );
    }

    #[test]
    fn test_iframe_source_by_selector() {
        let base = Url::parse("https://events.example.com/list").unwrap();
        let src = iframe_source(LISTING, &base, "#calendar").unwrap();
        assert_eq!(
            src.map(String::from).as_deref(),
            Some("https://events.example.com/embed/calendar")
        );
        assert_eq!(iframe_source(LISTING, &base, "h1").unwrap(), None);
    }

    #[tokio::test]
    async fn test_page_select_and_url() {
        let page = page_with(LISTING);
        let titles = page.select("li.event", None, true).await.unwrap();
        assert_eq!(titles, vec!["Jazz night", "Book fair"]);
        assert_eq!(
            page.url().await.unwrap().as_deref(),
            Some("https://events.example.com/list")
        );
    }

    #[tokio::test]
    async fn test_wait_for_selector_on_static_document() {
        let page = page_with(LISTING);
        assert!(page.wait_for_selector("li.event").await.is_ok());
        assert!(matches!(
            page.wait_for_selector(".spinner-done").await,
            Err(AppError::ExtractionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_interactions_are_unsupported() {
        let page = page_with(LISTING);
        assert!(page.click("button").await.is_err());
        assert!(page.type_text("input", "jazz").await.is_err());
        assert!(page.screenshot().await.is_err());
        assert!(page.scroll(None).await.is_ok());
        assert_eq!(page.memory_usage().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_select_before_goto_fails() {
        let launcher = HttpLauncher::new().unwrap();
        let browser = launcher.launch(&BrowserOptions::default()).await.unwrap();
        let page = browser.new_page(&BrowserOptions::default()).await.unwrap();
        assert!(page.select("h1", None, false).await.is_err());
        assert_eq!(page.url().await.unwrap(), None);
    }
}
