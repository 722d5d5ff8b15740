//! Iframe discovery and per-frame extraction.
//!
//! Frame problems are never fatal to a scrape: a frame that fails to load or
//! extract is logged and left out of the result.

use std::time::Duration;

use crate::engine::extract_fields;
use crate::error::AppError;
use crate::models::{ExtractedData, Extractor};
use crate::traits::{Document, Frame, Page};

/// Every child frame of the page, in document order.
pub async fn get_all_iframes<P: Page>(page: &P) -> Result<Vec<P::Frame>, AppError> {
    let frames = page.frames().await?;
    tracing::debug!(count = frames.len(), "Discovered iframes");
    Ok(frames)
}

/// Wait up to `limit` for the frame's document to finish loading.
/// Returns `false` on timeout or error instead of failing.
pub async fn wait_for_iframe_load<F: Frame>(frame: &F, limit: Duration) -> bool {
    match tokio::time::timeout(limit, frame.wait_for_load()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Iframe load failed");
            false
        }
        Err(_) => {
            tracing::debug!(timeout_ms = limit.as_millis() as u64, "Iframe load timed out");
            false
        }
    }
}

/// Run the extractor set inside one frame.
pub async fn extract_from_iframe<F: Frame>(
    frame: &F,
    extractors: &[Extractor],
) -> Result<ExtractedData, AppError> {
    extract_fields(frame, extractors).await
}

/// Follow a chain of iframe selectors, each resolved inside the previous
/// frame's document. Returns `None` as soon as a link is missing.
pub async fn handle_nested_iframes<P: Page>(page: &P, selectors: &[&str]) -> Option<P::Frame> {
    let (first, rest) = selectors.split_first()?;

    let mut current = match page.content_frame(first).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return None,
        Err(e) => {
            tracing::debug!(selector = first, error = %e, "Iframe lookup failed");
            return None;
        }
    };

    for selector in rest {
        current = match current.content_frame(selector).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(selector, error = %e, "Nested iframe lookup failed");
                return None;
            }
        };
    }

    Some(current)
}

/// Frames that yielded data, keyed `iframe_<index>`, and how many frames were processed.
#[derive(Debug, Default)]
pub struct FrameExtraction {
    pub sections: ExtractedData,
    pub frames_processed: usize,
}

/// Extract from every child frame. Frames that do not finish loading within
/// `load_timeout` are skipped and not counted; frames with no data are
/// omitted; per-frame errors are logged and skipped.
pub async fn extract_all_frames<P: Page>(
    page: &P,
    extractors: &[Extractor],
    load_timeout: Duration,
) -> FrameExtraction {
    let mut out = FrameExtraction::default();

    let frames = match get_all_iframes(page).await {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!(error = %e, "Could not enumerate iframes");
            return out;
        }
    };

    for (index, frame) in frames.iter().enumerate() {
        if !wait_for_iframe_load(frame, load_timeout).await {
            tracing::debug!(index, "Iframe did not load, skipping");
            continue;
        }
        out.frames_processed += 1;

        match extract_from_iframe(frame, extractors).await {
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                out.sections
                    .insert(format!("iframe_{index}"), serde_json::Value::Object(data));
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Iframe extraction failed, skipping");
            }
        }
    }

    out
}
