use std::path::{Path, PathBuf};
use std::sync::Arc;

use argos_core::error::AppError;
use argos_core::job::{ScheduleUpdate, SiteRegistration};
use argos_core::traits::RegistrationStore;
use tokio::sync::Mutex;

/// Site registrations kept in one JSON document.
///
/// The file is the source of truth: every operation re-reads it under a
/// mutex, so edits made by another process (the CLI while the server runs)
/// are seen and never clobbered by a stale copy. Writes go through a temp
/// file and rename.
#[derive(Clone)]
pub struct JsonRegistrationStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JsonRegistrationStore {
    /// Open `path`, which may not exist yet. A corrupt file is an error.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let entries = load(&path).await?;
        tracing::debug!(path = %path.display(), count = entries.len(), "Registrations loaded");
        Ok(Self {
            path,
            lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enable or disable a site. Returns false if the id is unknown.
    pub async fn set_enabled(&self, site_id: &str, enabled: bool) -> Result<bool, AppError> {
        let _guard = self.lock.lock().await;
        let mut entries = load(&self.path).await?;
        let Some(entry) = entries.iter_mut().find(|r| r.id() == site_id) else {
            return Ok(false);
        };
        entry.site.enabled = enabled;
        persist(&self.path, &entries).await?;
        tracing::info!(site_id, enabled, "Registration updated");
        Ok(true)
    }
}

impl RegistrationStore for JsonRegistrationStore {
    async fn list(&self) -> Result<Vec<SiteRegistration>, AppError> {
        let _guard = self.lock.lock().await;
        load(&self.path).await
    }

    async fn get(&self, site_id: &str) -> Result<Option<SiteRegistration>, AppError> {
        let _guard = self.lock.lock().await;
        Ok(load(&self.path)
            .await?
            .into_iter()
            .find(|r| r.id() == site_id))
    }

    async fn upsert(&self, registration: &SiteRegistration) -> Result<(), AppError> {
        let _guard = self.lock.lock().await;
        let mut entries = load(&self.path).await?;
        match entries.iter_mut().find(|r| r.id() == registration.id()) {
            Some(existing) => *existing = registration.clone(),
            None => entries.push(registration.clone()),
        }
        persist(&self.path, &entries).await
    }

    async fn record_schedule(
        &self,
        site_id: &str,
        update: &ScheduleUpdate,
    ) -> Result<bool, AppError> {
        let _guard = self.lock.lock().await;
        let mut entries = load(&self.path).await?;
        let Some(entry) = entries.iter_mut().find(|r| r.id() == site_id) else {
            return Ok(false);
        };
        update.apply_to(entry);
        persist(&self.path, &entries).await?;
        Ok(true)
    }
}

async fn load(path: &Path) -> Result<Vec<SiteRegistration>, AppError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(AppError::StorageError(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

async fn persist(path: &Path, entries: &[SiteRegistration]) -> Result<(), AppError> {
    let storage = |e: std::io::Error| AppError::StorageError(format!("{}: {e}", path.display()));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(storage)?;
    }
    let bytes = serde_json::to_vec_pretty(entries)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(storage)?;
    tokio::fs::rename(&tmp, path).await.map_err(storage)?;
    Ok(())
}
