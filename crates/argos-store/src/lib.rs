pub mod config;
pub mod registrations;
pub mod results;
pub mod store;

pub use config::StoreConfig;
pub use registrations::JsonRegistrationStore;
pub use results::{FileResultStore, SaveMetadata, StoredResult};
pub use store::Store;
