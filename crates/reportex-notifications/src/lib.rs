//! Operator notification sinks.
//!
//! Every terminal transaction outcome produces one human-readable message
//! (subject + body). The protocol crate only sees the [`MailService`] trait;
//! deployments choose the SMTP adapter, the log adapter, or both.

pub mod error;
pub mod log;
pub mod memory;
pub mod smtp;

pub use error::NotificationError;
pub use log::LogMailService;
pub use memory::{Mail, MemoryMailbox};
pub use smtp::{SmtpConfig, SmtpMailService};

use async_trait::async_trait;

/// A notification sink taking a subject and a plain-text body.
#[async_trait]
pub trait MailService: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotificationError>;
}
