use std::path::{Path, PathBuf};

use argos_core::error::AppError;
use argos_core::result::ScrapeResult;
use argos_core::traits::{ResultSink, SavedResult};
use argos_core::util::sanitize_filename;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Appended to every stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub filename: String,
    /// Size in bytes of the pretty-printed result, before this block is added.
    pub file_size: u64,
    pub saved_at: DateTime<Utc>,
}

/// On-disk shape: the result's own fields plus `siteId` and `saveMetadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResult {
    pub site_id: String,
    #[serde(flatten)]
    pub result: ScrapeResult,
    pub save_metadata: SaveMetadata,
}

/// Date-partitioned result files:
/// `<root>/<YYYY-MM-DD>/<siteId>_<timestamp>.json`.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    root: PathBuf,
}

impl FileResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn read(&self, path: &Path) -> Result<StoredResult, AppError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| storage_error(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Stored files for one day, sorted by name.
    pub async fn list_day(&self, day: NaiveDate) -> Result<Vec<PathBuf>, AppError> {
        let dir = self.root.join(day.format(DAY_FORMAT).to_string());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(&dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Delete day directories older than `keep_days` relative to `today`.
    /// Directories whose names are not dates are left alone. Returns the
    /// number of directories removed.
    pub async fn prune_older_than(&self, keep_days: u32, today: NaiveDate) -> Result<usize, AppError> {
        let cutoff = today - chrono::Days::new(u64::from(keep_days));
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(storage_error(&self.root, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&self.root, e))?
        {
            let name = entry.file_name();
            let Some(day) = name
                .to_str()
                .and_then(|n| NaiveDate::parse_from_str(n, DAY_FORMAT).ok())
            else {
                continue;
            };
            if day < cutoff {
                let path = entry.path();
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| storage_error(&path, e))?;
                tracing::info!(day = %day, "Pruned stored results");
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn save_at(
        &self,
        site_id: &str,
        result: &ScrapeResult,
        now: DateTime<Utc>,
    ) -> Result<SavedResult, AppError> {
        let dir = self.root.join(now.format(DAY_FORMAT).to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error(&dir, e))?;

        let payload_size = serde_json::to_vec_pretty(result)?.len() as u64;
        let stem = format!(
            "{}_{}",
            sanitize_filename(site_id),
            now.format("%Y-%m-%dT%H-%M-%S-%3fZ")
        );

        let mut attempt = 0u32;
        loop {
            let filename = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{attempt}.json")
            };
            let path = dir.join(&filename);
            let stored = StoredResult {
                site_id: site_id.to_string(),
                result: result.clone(),
                save_metadata: SaveMetadata {
                    filename: filename.clone(),
                    file_size: payload_size,
                    saved_at: now,
                },
            };
            let bytes = serde_json::to_vec_pretty(&stored)?;

            match write_new(&path, &bytes).await {
                Ok(()) => {
                    tracing::debug!(site_id, path = %path.display(), "Result stored");
                    return Ok(SavedResult {
                        path,
                        filename,
                        file_size: bytes.len() as u64,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(storage_error(&path, e)),
            }
        }
    }
}

impl ResultSink for FileResultStore {
    async fn save(&self, site_id: &str, result: &ScrapeResult) -> Result<SavedResult, AppError> {
        self.save_at(site_id, result, Utc::now()).await
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

fn storage_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::StorageError(format!("{}: {e}", path.display()))
}
