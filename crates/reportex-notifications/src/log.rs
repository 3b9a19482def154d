use async_trait::async_trait;
use tracing::info;

use crate::MailService;
use crate::NotificationError;

/// Sink writing notifications to the log instead of a mailbox.
///
/// Default for deployments without SMTP settings, so terminal outcomes stay
/// visible to operators either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailService;

#[async_trait]
impl MailService for LogMailService {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        info!(subject, body, "Operator notification");
        Ok(())
    }
}
