//! Runtime choice between the Chromium and HTTP engines.
//!
//! The page traits are not object safe, so the choice is an enum at every
//! level (launcher, browser, page, frame) with each method forwarded.

use std::str::FromStr;

use argos_core::error::AppError;
use argos_core::models::BrowserOptions;
use argos_core::traits::{Browser, BrowserLauncher, Document, Frame, Page};

#[cfg(feature = "browser")]
use crate::browser::{ChromiumBrowser, ChromiumFrame, ChromiumLauncher, ChromiumPage};
use crate::http_engine::{HttpBrowser, HttpFrame, HttpLauncher, HttpPage};

/// Which engine drives pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Browser,
    Http,
}

impl Default for EngineKind {
    fn default() -> Self {
        if cfg!(feature = "browser") {
            EngineKind::Browser
        } else {
            EngineKind::Http
        }
    }
}

impl FromStr for EngineKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" | "chromium" => Ok(EngineKind::Browser),
            "http" => Ok(EngineKind::Http),
            other => Err(AppError::ConfigError(format!(
                "unknown engine '{other}' (expected 'browser' or 'http')"
            ))),
        }
    }
}

macro_rules! dispatch {
    ($value:expr, $inner:pat => $body:expr) => {
        match $value {
            #[cfg(feature = "browser")]
            Self::Chromium($inner) => $body,
            Self::Http($inner) => $body,
        }
    };
}

#[derive(Clone)]
pub enum EngineLauncher {
    #[cfg(feature = "browser")]
    Chromium(ChromiumLauncher),
    Http(HttpLauncher),
}

impl EngineLauncher {
    pub fn new(kind: EngineKind) -> Result<Self, AppError> {
        match kind {
            #[cfg(feature = "browser")]
            EngineKind::Browser => Ok(Self::Chromium(ChromiumLauncher::new())),
            #[cfg(not(feature = "browser"))]
            EngineKind::Browser => Err(AppError::ConfigError(
                "the browser engine is not compiled in (enable the 'browser' feature)".to_string(),
            )),
            EngineKind::Http => Ok(Self::Http(HttpLauncher::new()?)),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            #[cfg(feature = "browser")]
            Self::Chromium(_) => EngineKind::Browser,
            Self::Http(_) => EngineKind::Http,
        }
    }
}

impl BrowserLauncher for EngineLauncher {
    type Browser = EngineBrowser;

    async fn launch(&self, options: &BrowserOptions) -> Result<EngineBrowser, AppError> {
        Ok(match self {
            #[cfg(feature = "browser")]
            Self::Chromium(l) => EngineBrowser::Chromium(l.launch(options).await?),
            Self::Http(l) => EngineBrowser::Http(l.launch(options).await?),
        })
    }
}

pub enum EngineBrowser {
    #[cfg(feature = "browser")]
    Chromium(ChromiumBrowser),
    Http(HttpBrowser),
}

impl Browser for EngineBrowser {
    type Page = EnginePage;

    async fn new_page(&self, options: &BrowserOptions) -> Result<EnginePage, AppError> {
        Ok(match self {
            #[cfg(feature = "browser")]
            Self::Chromium(b) => EnginePage::Chromium(b.new_page(options).await?),
            Self::Http(b) => EnginePage::Http(b.new_page(options).await?),
        })
    }

    async fn close(self) -> Result<(), AppError> {
        dispatch!(self, b => b.close().await)
    }
}

pub enum EnginePage {
    #[cfg(feature = "browser")]
    Chromium(ChromiumPage),
    Http(HttpPage),
}

impl Document for EnginePage {
    type Frame = EngineFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        dispatch!(self, p => p.select(selector, attribute, multiple).await)
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<EngineFrame>, AppError> {
        Ok(match self {
            #[cfg(feature = "browser")]
            Self::Chromium(p) => p.content_frame(selector).await?.map(EngineFrame::Chromium),
            Self::Http(p) => p.content_frame(selector).await?.map(EngineFrame::Http),
        })
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        dispatch!(self, p => p.url().await)
    }
}

impl Page for EnginePage {
    async fn goto(&self, url: &str) -> Result<(), AppError> {
        dispatch!(self, p => p.goto(url).await)
    }

    async fn click(&self, selector: &str) -> Result<(), AppError> {
        dispatch!(self, p => p.click(selector).await)
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), AppError> {
        dispatch!(self, p => p.type_text(selector, text).await)
    }

    async fn scroll(&self, selector: Option<&str>) -> Result<(), AppError> {
        dispatch!(self, p => p.scroll(selector).await)
    }

    async fn wait_for_selector(&self, selector: &str) -> Result<(), AppError> {
        dispatch!(self, p => p.wait_for_selector(selector).await)
    }

    async fn wait_for_navigation(&self) -> Result<(), AppError> {
        dispatch!(self, p => p.wait_for_navigation().await)
    }

    async fn wait_for_network_idle(&self) -> Result<(), AppError> {
        dispatch!(self, p => p.wait_for_network_idle().await)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AppError> {
        dispatch!(self, p => p.screenshot().await)
    }

    async fn frames(&self) -> Result<Vec<EngineFrame>, AppError> {
        Ok(match self {
            #[cfg(feature = "browser")]
            Self::Chromium(p) => p.frames().await?.into_iter().map(EngineFrame::Chromium).collect(),
            Self::Http(p) => p.frames().await?.into_iter().map(EngineFrame::Http).collect(),
        })
    }

    async fn memory_usage(&self) -> Result<Option<u64>, AppError> {
        dispatch!(self, p => p.memory_usage().await)
    }
}

#[derive(Clone)]
pub enum EngineFrame {
    #[cfg(feature = "browser")]
    Chromium(ChromiumFrame),
    Http(HttpFrame),
}

impl Document for EngineFrame {
    type Frame = EngineFrame;

    async fn select(
        &self,
        selector: &str,
        attribute: Option<&str>,
        multiple: bool,
    ) -> Result<Vec<String>, AppError> {
        dispatch!(self, f => f.select(selector, attribute, multiple).await)
    }

    async fn content_frame(&self, selector: &str) -> Result<Option<EngineFrame>, AppError> {
        Ok(match self {
            #[cfg(feature = "browser")]
            Self::Chromium(f) => f.content_frame(selector).await?.map(EngineFrame::Chromium),
            Self::Http(f) => f.content_frame(selector).await?.map(EngineFrame::Http),
        })
    }

    async fn url(&self) -> Result<Option<String>, AppError> {
        dispatch!(self, f => f.url().await)
    }
}

impl Frame for EngineFrame {
    async fn wait_for_load(&self) -> Result<(), AppError> {
        dispatch!(self, f => f.wait_for_load().await)
    }
}
