use crate::error::AppError;
use crate::traits::{Notification, Notifier};

/// Notifier that only logs. Used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), AppError> {
        match notification {
            Notification::NewContent {
                site_id,
                url,
                content_hash,
            } => {
                tracing::info!(%site_id, %url, %content_hash, "Notification: new content");
            }
            Notification::Error {
                site_id,
                url,
                error,
            } => {
                tracing::warn!(%site_id, %url, %error, "Notification: scrape error");
            }
        }
        Ok(())
    }
}
