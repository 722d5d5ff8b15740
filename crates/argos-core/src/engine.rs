//! Instruction execution and data extraction against one browser page.
//!
//! The engine owns exactly one browser process. Instructions are executed in
//! the order given, each under its own deadline; an `optional` instruction
//! that fails is logged and reported as `Ok(false)`, anything else aborts
//! the sequence with an error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::AppError;
use crate::models::{Action, BrowserOptions, ExtractedData, Extractor, Instruction, Transform, WaitCondition};
use crate::traits::{Browser, BrowserLauncher, Document, Page};
use crate::util::sanitize_filename;

/// Owns one browser process for the duration of a scrape.
pub struct AutomationEngine<B: Browser> {
    browser: B,
    options: BrowserOptions,
    screenshot_dir: PathBuf,
}

impl<B: Browser> AutomationEngine<B> {
    /// Launch the browser. Any failure here is fatal to the scrape.
    pub async fn initialize<L>(
        launcher: &L,
        options: &BrowserOptions,
        screenshot_dir: impl Into<PathBuf>,
    ) -> Result<Self, AppError>
    where
        L: BrowserLauncher<Browser = B>,
    {
        let browser = launcher.launch(options).await.map_err(|e| match e {
            AppError::BrowserLaunchFailed(_) => e,
            other => AppError::BrowserLaunchFailed(other.to_string()),
        })?;
        tracing::debug!(headless = options.headless, "Browser launched");

        Ok(Self {
            browser,
            options: options.clone(),
            screenshot_dir: screenshot_dir.into(),
        })
    }

    pub async fn create_page(&self) -> Result<B::Page, AppError> {
        self.browser.new_page(&self.options).await
    }

    /// Execute one instruction, returning whether it succeeded.
    pub async fn execute_instruction(
        &self,
        page: &B::Page,
        instruction: &Instruction,
    ) -> Result<bool, AppError> {
        let limit = instruction.timeout().unwrap_or(self.options.timeout());
        tracing::debug!(
            step = instruction.step,
            action = instruction.action.kind(),
            "{}",
            instruction.description
        );

        match self.dispatch(page, instruction, limit).await {
            Ok(()) => Ok(true),
            Err(e) if instruction.optional => {
                tracing::warn!(
                    step = instruction.step,
                    error = %e,
                    "Optional instruction failed, continuing"
                );
                Ok(false)
            }
            Err(e) => Err(match (&instruction.action, e) {
                (_, e @ AppError::Cancelled(_)) => e,
                (Action::Navigate { .. }, AppError::Timeout(ms)) => AppError::NetworkFetchFailed(
                    format!("navigation timed out after {ms} ms"),
                ),
                (Action::Navigate { .. }, e) => AppError::NetworkFetchFailed(e.to_string()),
                (_, e) => AppError::InstructionFailed {
                    step: instruction.step,
                    description: instruction.description.clone(),
                    message: e.to_string(),
                },
            }),
        }
    }

    async fn dispatch(
        &self,
        page: &B::Page,
        instruction: &Instruction,
        limit: Duration,
    ) -> Result<(), AppError> {
        match &instruction.action {
            Action::Navigate { value } => {
                let url = value.as_deref().ok_or_else(|| {
                    AppError::ValidationError("navigate instruction has no URL".into())
                })?;
                with_timeout(limit, page.goto(url)).await
            }
            Action::Click { selector } => {
                with_timeout(limit, page.click(selector)).await?;
                if instruction.wait_for == Some(WaitCondition::Navigation) {
                    with_timeout(limit, page.wait_for_navigation()).await?;
                }
                Ok(())
            }
            Action::Wait { selector, value } => match (instruction.wait_for, selector) {
                (Some(WaitCondition::Navigation), _) => {
                    with_timeout(limit, page.wait_for_navigation()).await
                }
                (Some(WaitCondition::NetworkIdle), _) => {
                    with_timeout(limit, page.wait_for_network_idle()).await
                }
                (Some(WaitCondition::Selector) | None, Some(selector)) => {
                    with_timeout(limit, page.wait_for_selector(selector)).await
                }
                (Some(WaitCondition::Timeout) | None, _) | (Some(WaitCondition::Selector), None) => {
                    let pause = value
                        .as_deref()
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_millis)
                        .unwrap_or(limit);
                    tokio::time::sleep(pause).await;
                    Ok(())
                }
            },
            Action::Type { selector, value } => {
                with_timeout(limit, page.type_text(selector, value)).await
            }
            Action::Scroll { selector } => with_timeout(limit, page.scroll(selector.as_deref())).await,
            Action::Extract {} => Ok(()),
            Action::Screenshot { value } => {
                let name = value
                    .clone()
                    .unwrap_or_else(|| format!("step-{}.png", instruction.step));
                let path = save_screenshot(page, &self.screenshot_dir, &name, limit).await?;
                tracing::info!(path = %path.display(), "Screenshot saved");
                Ok(())
            }
        }
    }

    /// Run the extractor set against the page's current document.
    pub async fn extract_data(
        &self,
        page: &B::Page,
        extractors: &[Extractor],
    ) -> Result<ExtractedData, AppError> {
        extract_fields(page, extractors).await
    }

    /// Tear down the browser process.
    pub async fn close(self) -> Result<(), AppError> {
        self.browser.close().await
    }
}

/// Apply `limit` to a browser call, mapping expiry to [`AppError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(AppError::Timeout(limit.as_millis() as u64)),
    }
}

/// Capture a full-page screenshot and write it under `dir`.
pub async fn save_screenshot<P: Page>(
    page: &P,
    dir: &Path,
    name: &str,
    limit: Duration,
) -> Result<PathBuf, AppError> {
    let bytes = with_timeout(limit, page.screenshot()).await?;

    let mut filename = sanitize_filename(name);
    if !filename.ends_with(".png") {
        filename.push_str(".png");
    }
    let path = dir.join(filename);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::StorageError(format!("{}: {e}", dir.display())))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| AppError::StorageError(format!("{}: {e}", path.display())))?;

    Ok(path)
}

/// Extraction policy shared by the main page and every frame.
///
/// Values are trimmed and transformed, empty values are dropped. A required
/// extractor that yields nothing fails the pass; an optional one is skipped.
pub async fn extract_fields<D: Document>(
    doc: &D,
    extractors: &[Extractor],
) -> Result<ExtractedData, AppError> {
    let base_url = doc.url().await.ok().flatten();
    let mut data = ExtractedData::new();

    for extractor in extractors {
        let raw = match doc
            .select(&extractor.selector, extractor.attribute.as_deref(), extractor.multiple)
            .await
        {
            Ok(values) => values,
            Err(e) if extractor.required => {
                return Err(AppError::ExtractionFailed(format!(
                    "required field '{}' ({}): {e}",
                    extractor.name, extractor.selector
                )));
            }
            Err(e) => {
                tracing::warn!(field = %extractor.name, error = %e, "Optional extractor failed");
                continue;
            }
        };

        let values: Vec<serde_json::Value> = raw
            .iter()
            .filter_map(|v| apply_transform(v, extractor.transform, base_url.as_deref()))
            .collect();

        let value = if extractor.multiple {
            (!values.is_empty()).then_some(serde_json::Value::Array(values))
        } else {
            values.into_iter().next()
        };

        match value {
            Some(value) => {
                data.insert(extractor.name.clone(), value);
            }
            None if extractor.required => {
                return Err(AppError::ExtractionFailed(format!(
                    "required field '{}' matched nothing for selector '{}'",
                    extractor.name, extractor.selector
                )));
            }
            None => {
                tracing::debug!(field = %extractor.name, "No value for optional field");
            }
        }
    }

    Ok(data)
}

/// Trim, transform, and drop empty results.
fn apply_transform(
    raw: &str,
    transform: Option<Transform>,
    base_url: Option<&str>,
) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value = match transform {
        None | Some(Transform::Trim) => serde_json::Value::String(trimmed.to_string()),
        Some(Transform::Lowercase) => serde_json::Value::String(trimmed.to_lowercase()),
        Some(Transform::Uppercase) => serde_json::Value::String(trimmed.to_uppercase()),
        Some(Transform::CollapseWhitespace) => {
            serde_json::Value::String(trimmed.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Some(Transform::Number) => {
            let number = parse_number(trimmed)?;
            serde_json::Number::from_f64(number).map(serde_json::Value::Number)?
        }
        Some(Transform::AbsoluteUrl) => {
            let resolved = base_url
                .and_then(|base| Url::parse(base).ok())
                .and_then(|base| base.join(trimmed).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| trimmed.to_string());
            serde_json::Value::String(resolved)
        }
    };

    Some(value)
}

/// First numeric token, tolerating thousands separators ("1,299.00" → 1299.0).
fn parse_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit() || c == '-')?;
    let token: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .filter(|c| *c != ',')
        .collect();
    token.parse().ok()
}
