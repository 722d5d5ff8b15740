use std::path::PathBuf;
use std::time::Duration;

use argos_core::error::AppError;
use argos_core::models::BrowserOptions;
use argos_core::traits::{Browser, BrowserLauncher, Document, Frame, Page};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventResponseReceived, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CreateIsolatedWorldParams, FrameId, FrameTree, GetFrameTreeParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, EventConsoleApiCalled};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser as CdpBrowser, BrowserConfig, Page as CdpPage};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::DEFAULT_USER_AGENT;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const IDLE_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);
const IDLE_QUIET_PERIOD: Duration = Duration::from_millis(1_000);
const ISOLATED_WORLD: &str = "argos";

/// Launches one headless Chromium process per scrape over the Chrome
/// DevTools Protocol.
///
/// Requires a Chromium / Chrome binary: `CHROME_BIN`, a well-known install
/// path, or whatever `chromiumoxide` finds on its own.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    chrome_bin: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit binary instead of searching for one.
    pub fn with_chrome_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_bin = Some(path.into());
        self
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode,
    /// so the binary inside the snap is preferred.
    pub fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        [
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }

    fn config(&self, options: &BrowserOptions) -> Result<BrowserConfig, AppError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .disable_default_args()
            .window_size(options.viewport.width, options.viewport.height);

        if let Some(bin) = self.chrome_bin.clone().or_else(Self::find_chrome_binary) {
            tracing::debug!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        builder = if options.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };

        builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserLaunchFailed(format!("invalid browser config: {e}")))
    }
}

impl BrowserLauncher for ChromiumLauncher {
    type Browser = ChromiumBrowser;

    async fn launch(&self, options: &BrowserOptions) -> Result<ChromiumBrowser, AppError> {
        let config = self.config(options)?;
        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .map_err(|e| AppError::BrowserLaunchFailed(e.to_string()))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        tracing::debug!(headless = options.headless, "Browser launched");
        Ok(ChromiumBrowser { browser, handler })
    }
}

pub struct ChromiumBrowser {
    browser: CdpBrowser,
    handler: JoinHandle<()>,
}

impl Browser for ChromiumBrowser {
    type Page = ChromiumPage;

    async fn new_page(&self, options: &BrowserOptions) -> Result<ChromiumPage, AppError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserLaunchFailed(format!("could not open page: {e}")))?;

        let user_agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .map_err(cdp_error)?;
        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(options.viewport.width),
            i64::from(options.viewport.height),
            1.0,
            false,
        ))
        .await
        .map_err(cdp_error)?;

        attach_observers(&page).await;
        Ok(ChromiumPage {
            ctx: Context {
                page,
                frame: None,
            },
        })
    }

    async fn close(self) -> Result<(), AppError> {
        let mut browser = self.browser;
        let closed = browser.close().await.map(|_| ()).map_err(cdp_error);
        if let Err(e) = browser.wait().await {
            tracing::debug!(error = %e, "Browser process did not exit cleanly");
        }
        self.handler.abort();
        closed
    }
}

/// Console output and failed responses are logged, never acted on.
async fn attach_observers(page: &CdpPage) {
    if let Ok(mut console) = page.event_listener::<EventConsoleApiCalled>().await {
        tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let text: Vec<String> = event
                    .args
                    .iter()
                    .filter_map(|arg| {
                        arg.value
                            .as_ref()
                            .map(Value::to_string)
                            .or_else(|| arg.description.clone())
                    })
                    .collect();
                tracing::debug!(kind = ?event.r#type, message = %text.join(" "), "Browser console");
            }
        });
    }

    if let Ok(mut responses) = page.event_listener::<EventResponseReceived>().await {
        tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                if event.response.status >= 400 {
                    tracing::warn!(
                        status = event.response.status,
                        url = %event.response.url,
                        "Page resource failed"
                    );
                }
            }
        });
    }

    if let Ok(mut failures) = page.event_listener::<EventLoadingFailed>().await {
        tokio::spawn(async move {
            while let Some(event) = failures.next().await {
                tracing::warn!(error = %event.error_text, "Page resource failed to load");
            }
        });
    }
}

/// Where scripts run: the main frame, or an isolated world inside one
/// child frame.
#[derive(Clone)]
struct Context {
    page: CdpPage,
    frame: Option<FrameId>,
}

impl Context {
    async fn eval(&self, expression: String) -> Result<Value, AppError> {
        let Some(frame_id) = &self.frame else {
            let evaluated = self.page.evaluate(expression).await.map_err(script_error)?;
            return Ok(evaluated.value().cloned().unwrap_or(Value::Null));
        };

        let mut world = CreateIsolatedWorldParams::new(frame_id.clone());
        world.world_name = Some(ISOLATED_WORLD.to_string());
        let context_id = self
            .page
            .execute(world)
            .await
            .map_err(cdp_error)?
            .result
            .execution_context_id;

        let params = EvaluateParams::builder()
            .expression(expression)
            .context_id(context_id)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(AppError::ExtractionFailed)?;
        let evaluated = self.page.execute(params).await.map_err(cdp_error)?.result;
        if let Some(exception) = evaluated.exception_details {
            return Err(AppError::ExtractionFailed(format!(
                "script threw in frame: {}",
                exception.text
            )));
        }
        Ok(evaluated.result.value.unwrap_or(Value::Null))
    }

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        let value = self.eval(select_script(selector, attribute, multiple)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn frame_tree(&self) -> Result<FrameTree, AppError> {
        Ok(self
            .page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(cdp_error)?
            .result
            .frame_tree)
    }

    /// Locates the child frame loaded by the iframe element `selector`,
    /// matched by frame name first, then by URL.
    async fn content_frame(&self, selector: &str) -> Result<Option<Context>, AppError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el || el.tagName !== 'IFRAME') return null;
                return {{ name: el.getAttribute('name') || el.id || '', src: el.src || '' }};
            }})()"#,
            sel = Value::from(selector)
        );
        let element = self.eval(script).await?;
        if element.is_null() {
            return Ok(None);
        }
        let name = element["name"].as_str().unwrap_or_default();
        let src = element["src"].as_str().unwrap_or_default();

        let tree = self.frame_tree().await?;
        let parent = match &self.frame {
            Some(id) => find_subtree(&tree, id),
            None => Some(&tree),
        };
        let children = parent
            .and_then(|node| node.child_frames.as_deref())
            .unwrap_or_default();

        let by_name = children
            .iter()
            .find(|child| !name.is_empty() && child.frame.name.as_deref() == Some(name));
        let matched = by_name.or_else(|| {
            children
                .iter()
                .find(|child| !src.is_empty() && child.frame.url == src)
        });

        Ok(matched.map(|child| Context {
            page: self.page.clone(),
            frame: Some(child.frame.id.clone()),
        }))
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        match self.frame {
            None => self.page.url().await.map_err(cdp_error),
            Some(_) => Ok(self.eval("location.href".to_string()).await?.as_str().map(str::to_string)),
        }
    }
}

fn find_subtree<'a>(tree: &'a FrameTree, id: &FrameId) -> Option<&'a FrameTree> {
    if &tree.frame.id == id {
        return Some(tree);
    }
    tree.child_frames
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find_map(|child| find_subtree(child, id))
}

fn descendants(tree: &FrameTree, out: &mut Vec<FrameId>) {
    for child in tree.child_frames.as_deref().unwrap_or_default() {
        out.push(child.frame.id.clone());
        descendants(child, out);
    }
}

/// Text (`innerText`) or attribute values of the first, or every, match.
fn select_script(selector: &str, attribute: Option<&str>, multiple: bool) -> String {
    let attribute = attribute.map_or(Value::Null, Value::from);
    format!(
        r#"(() => {{
            const nodes = Array.from(document.querySelectorAll({sel}));
            const picked = {multiple} ? nodes : nodes.slice(0, 1);
            const attr = {attribute};
            return picked.map(n => attr === null
                ? (n.innerText ?? n.textContent ?? '')
                : (n.getAttribute(attr) ?? ''));
        }})()"#,
        sel = Value::from(selector),
    )
}

fn cdp_error(e: chromiumoxide::error::CdpError) -> AppError {
    AppError::NetworkFetchFailed(format!("CDP: {e}"))
}

fn script_error(e: chromiumoxide::error::CdpError) -> AppError {
    AppError::ExtractionFailed(format!("script failed: {e}"))
}

pub struct ChromiumPage {
    ctx: Context,
}

impl ChromiumPage {
    async fn find(&self, selector: &str) -> Result<chromiumoxide::Element, AppError> {
        self.ctx
            .page
            .find_element(selector)
            .await
            .map_err(|e| AppError::ExtractionFailed(format!("'{selector}' not found: {e}")))
    }
}

impl Document for ChromiumPage {
    type Frame = ChromiumFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        self.ctx.select(selector, attribute, multiple).await
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<ChromiumFrame>, AppError> {
        Ok(self
            .ctx
            .content_frame(selector)
            .await?
            .map(|ctx| ChromiumFrame { ctx }))
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        self.ctx.url().await
    }
}

impl Page for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        self.ctx
            .page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| AppError::NetworkFetchFailed(format!("{url}: {e}")))
    }

    async fn click(&self, selector: &str) -> Result<(), AppError> {
        self.find(selector).await?.click().await.map_err(cdp_error)?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AppError> {
        let element = self.find(selector).await?;
        element.click().await.map_err(cdp_error)?;
        element.type_str(text).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn scroll(&self, selector: Option<&str>) -> Result<(), AppError> {
        match selector {
            Some(selector) => {
                self.find(selector)
                    .await?
                    .scroll_into_view()
                    .await
                    .map_err(cdp_error)?;
            }
            None => {
                self.ctx
                    .eval("window.scrollTo(0, document.body.scrollHeight); true".to_string())
                    .await?;
            }
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), AppError> {
        while self.ctx.page.find_element(selector).await.is_err() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn wait_for_navigation(&self) -> Result<(), AppError> {
        self.ctx
            .page
            .wait_for_navigation()
            .await
            .map(|_| ())
            .map_err(|e| AppError::NetworkFetchFailed(format!("navigation: {e}")))
    }

    /// Quiescence heuristic: document complete and the resource-timing
    /// count unchanged for one second.
    async fn wait_for_network_idle(&self) -> Result<(), AppError> {
        let readiness = "({ ready: document.readyState === 'complete', \
                     count: performance.getEntriesByType('resource').length })";
        let mut last_count = None;
        let mut quiet = Duration::ZERO;
        loop {
            let sample = self.ctx.eval(readiness.to_string()).await?;
            let ready = sample["ready"].as_bool().unwrap_or(false);
            let count = sample["count"].as_u64();
            if ready && count == last_count {
                quiet += IDLE_SAMPLE_INTERVAL;
                if quiet >= IDLE_QUIET_PERIOD {
                    return Ok(());
                }
            } else {
                quiet = Duration::ZERO;
            }
            last_count = count;
            tokio::time::sleep(IDLE_SAMPLE_INTERVAL).await;
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.ctx.page.screenshot(params).await.map_err(cdp_error)
    }

    async fn frames(&self) -> Result<Vec<ChromiumFrame>, AppError> {
        let tree = self.ctx.frame_tree().await?;
        let mut ids = Vec::new();
        descendants(&tree, &mut ids);
        Ok(ids
            .into_iter()
            .map(|id| ChromiumFrame {
                ctx: Context {
                    page: self.ctx.page.clone(),
                    frame: Some(id),
                },
            })
            .collect())
    }

    async fn memory_usage(&self) -> Result<Option<u64>, AppError> {
        let used = self
            .ctx
            .eval("(performance.memory && performance.memory.usedJSHeapSize) || null".to_string())
            .await?;
        Ok(used.as_u64())
    }
}

#[derive(Clone)]
pub struct ChromiumFrame {
    ctx: Context,
}

impl Document for ChromiumFrame {
    type Frame = ChromiumFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        self.ctx.select(selector, attribute, multiple).await
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<ChromiumFrame>, AppError> {
        Ok(self
            .ctx
            .content_frame(selector)
            .await?
            .map(|ctx| ChromiumFrame { ctx }))
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        self.ctx.url().await
    }
}

impl Frame for ChromiumFrame {
    async fn wait_for_load(&self) -> Result<(), AppError> {
        loop {
            let state = self.ctx.eval("document.readyState".to_string()).await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
