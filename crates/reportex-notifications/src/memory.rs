use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::MailService;
use crate::NotificationError;

/// A captured notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub subject: String,
    pub body: String,
}

/// Sink collecting notifications for test assertions.
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    mails: Mutex<Vec<Mail>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mails(&self) -> Vec<Mail> {
        self.mails.lock().await.clone()
    }
}

#[async_trait]
impl MailService for MemoryMailbox {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        self.mails.lock().await.push(Mail {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
