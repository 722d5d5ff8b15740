use argos_core::AppError;

use crate::config::StoreConfig;
use crate::registrations::JsonRegistrationStore;
use crate::results::FileResultStore;

/// Central storage facade: owns the layout and vends the stores.
#[derive(Clone)]
pub struct Store {
    config: StoreConfig,
    registrations: JsonRegistrationStore,
    results: FileResultStore,
}

impl Store {
    pub async fn open(config: StoreConfig) -> Result<Self, AppError> {
        let registrations = JsonRegistrationStore::open(config.registrations_path()).await?;
        let results = FileResultStore::new(config.results_dir());
        tracing::info!(data_dir = %config.data_dir.display(), "Store opened");
        Ok(Self {
            config,
            registrations,
            results,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registrations(&self) -> JsonRegistrationStore {
        self.registrations.clone()
    }

    pub fn results(&self) -> FileResultStore {
        self.results.clone()
    }
}
