use argos_store::{Store, StoreConfig};
use tempfile::TempDir;

/// Opens a store rooted in a fresh temporary directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// deletes the directory.
pub async fn setup_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = StoreConfig::default()
        .with_data_dir(dir.path().join("data"))
        .with_sites_dir(dir.path().join("sites"));
    let store = Store::open(config).await.expect("open store");
    (store, dir)
}
