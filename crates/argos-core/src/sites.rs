//! Site configuration loading, validation, and URL matching.
//!
//! Configurations live one JSON file per site in a directory. Files are
//! checked structurally against [`site_config_schema`] and then semantically
//! via [`SiteConfig::validate`]. The loader caches parsed configurations
//! in memory until [`SiteConfigLoader::reload`] is called.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use url::Url;

use crate::error::AppError;
use crate::models::SiteConfig;
use crate::traits::SiteConfigSource;

/// JSON Schema for the structural shape of a site configuration file.
pub fn site_config_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["id", "domain"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "name": {"type": "string"},
            "domain": {"type": "string", "minLength": 1},
            "urlPatterns": {"type": "array", "items": {"type": "string"}},
            "enabled": {"type": "boolean"},
            "version": {"type": "string"},
            "instructions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["step", "action", "description"],
                    "properties": {
                        "step": {"type": "integer", "minimum": 0},
                        "action": {
                            "enum": ["navigate", "click", "wait", "type", "scroll", "extract", "screenshot"]
                        },
                        "description": {"type": "string"},
                        "selector": {"type": "string"},
                        "value": {"type": "string"},
                        "timeoutMs": {"type": "integer", "minimum": 0},
                        "waitFor": {"enum": ["navigation", "selector", "timeout", "networkidle"]},
                        "optional": {"type": "boolean"}
                    }
                }
            },
            "extractors": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "selector"],
                    "properties": {
                        "name": {"type": "string"},
                        "selector": {"type": "string"},
                        "attribute": {"type": "string"},
                        "multiple": {"type": "boolean"},
                        "required": {"type": "boolean"},
                        "transform": {
                            "enum": ["trim", "lowercase", "uppercase", "collapseWhitespace", "number", "absoluteUrl"]
                        }
                    }
                }
            },
            "options": {
                "type": "object",
                "properties": {
                    "headless": {"type": "boolean"},
                    "userAgent": {"type": ["string", "null"]},
                    "viewport": {
                        "type": "object",
                        "required": ["width", "height"],
                        "properties": {
                            "width": {"type": "integer", "minimum": 1},
                            "height": {"type": "integer", "minimum": 1}
                        }
                    },
                    "retries": {"type": "integer", "minimum": 0},
                    "timeoutMs": {"type": "integer", "minimum": 1},
                    "politenessDelayMs": {"type": "integer", "minimum": 0},
                    "screenshotOnError": {"type": "boolean"},
                    "waitForIframes": {"type": "boolean"},
                    "iframeTimeoutMs": {"type": "integer", "minimum": 0}
                }
            }
        }
    })
}

/// Parse and fully validate one configuration document.
pub fn parse_site_config(raw: &str) -> Result<SiteConfig, AppError> {
    let document: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AppError::ValidationError(format!("invalid JSON: {e}")))?;

    let validator = jsonschema::validator_for(&site_config_schema())
        .map_err(|e| AppError::ValidationError(format!("site schema: {e}")))?;
    let problems: Vec<String> = validator
        .iter_errors(&document)
        .map(|e| e.to_string())
        .collect();
    if !problems.is_empty() {
        return Err(AppError::ValidationError(problems.join("; ")));
    }

    let config: SiteConfig = serde_json::from_value(document)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Best match for `url`: enabled configurations win over disabled ones.
pub fn match_site<'a>(configs: &'a [SiteConfig], url: &Url) -> Option<&'a SiteConfig> {
    let mut fallback = None;
    for config in configs.iter().filter(|c| c.matches(url)) {
        if config.enabled {
            return Some(config);
        }
        fallback.get_or_insert(config);
    }
    fallback
}

/// Outcome of validating one file.
#[derive(Debug)]
pub struct FileValidation {
    pub path: PathBuf,
    pub result: Result<SiteConfig, AppError>,
}

/// Loads site configurations from a directory of `*.json` files.
#[derive(Clone)]
pub struct SiteConfigLoader {
    sites_dir: PathBuf,
    loaded: Arc<RwLock<Option<Arc<Vec<SiteConfig>>>>>,
}

impl SiteConfigLoader {
    pub fn new(sites_dir: impl Into<PathBuf>) -> Self {
        Self {
            sites_dir: sites_dir.into(),
            loaded: Arc::new(RwLock::new(None)),
        }
    }

    pub fn sites_dir(&self) -> &Path {
        &self.sites_dir
    }

    /// Read and validate a single file. Errors are fatal.
    pub async fn load_file(path: &Path) -> Result<SiteConfig, AppError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::StorageError(format!("{}: {e}", path.display())))?;
        parse_site_config(&raw).map_err(|e| match e {
            AppError::ValidationError(msg) => {
                AppError::ValidationError(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Validate every file in the directory without caching anything.
    pub async fn validate_dir(&self) -> Result<Vec<FileValidation>, AppError> {
        let mut out = Vec::new();
        for path in self.config_files().await? {
            let result = Self::load_file(&path).await;
            out.push(FileValidation { path, result });
        }
        Ok(out)
    }

    /// Load every valid configuration. Invalid files are logged and skipped;
    /// a missing directory yields an empty set.
    pub async fn load_all(&self) -> Result<Vec<SiteConfig>, AppError> {
        let mut configs: Vec<SiteConfig> = Vec::new();
        for path in self.config_files().await? {
            match Self::load_file(&path).await {
                Ok(config) => {
                    if configs.iter().any(|c| c.id == config.id) {
                        tracing::warn!(site_id = %config.id, path = %path.display(), "Duplicate site id, skipping");
                        continue;
                    }
                    configs.push(config);
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Invalid site configuration");
                }
            }
        }
        tracing::info!(count = configs.len(), dir = %self.sites_dir.display(), "Site configurations loaded");
        Ok(configs)
    }

    async fn cached(&self) -> Result<Arc<Vec<SiteConfig>>, AppError> {
        if let Some(configs) = self.loaded.read().await.as_ref() {
            return Ok(Arc::clone(configs));
        }

        let mut slot = self.loaded.write().await;
        if let Some(configs) = slot.as_ref() {
            return Ok(Arc::clone(configs));
        }
        let configs = Arc::new(self.load_all().await?);
        *slot = Some(Arc::clone(&configs));
        Ok(configs)
    }

    async fn config_files(&self) -> Result<Vec<PathBuf>, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.sites_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %self.sites_dir.display(), "Sites directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::StorageError(format!(
                    "{}: {e}",
                    self.sites_dir.display()
                )));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::StorageError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl SiteConfigSource for SiteConfigLoader {
    async fn resolve(&self, url: &Url) -> Result<Option<SiteConfig>, AppError> {
        let configs = self.cached().await?;
        Ok(match_site(&configs, url).cloned())
    }

    async fn list(&self) -> Result<Vec<SiteConfig>, AppError> {
        Ok(self.cached().await?.as_ref().clone())
    }

    async fn reload(&self) -> Result<usize, AppError> {
        let configs = Arc::new(self.load_all().await?);
        let count = configs.len();
        *self.loaded.write().await = Some(configs);
        Ok(count)
    }
}

/// A fixed in-memory set of configurations.
#[derive(Debug, Clone, Default)]
pub struct StaticSites(Arc<Vec<SiteConfig>>);

impl StaticSites {
    pub fn new(configs: Vec<SiteConfig>) -> Self {
        Self(Arc::new(configs))
    }
}

impl SiteConfigSource for StaticSites {
    async fn resolve(&self, url: &Url) -> Result<Option<SiteConfig>, AppError> {
        Ok(match_site(&self.0, url).cloned())
    }

    async fn list(&self) -> Result<Vec<SiteConfig>, AppError> {
        Ok(self.0.as_ref().clone())
    }

    async fn reload(&self) -> Result<usize, AppError> {
        Ok(self.0.len())
    }
}
