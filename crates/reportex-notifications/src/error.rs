use thiserror::Error;

/// Error types for notification delivery
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid notification config: {0}")]
    InvalidConfig(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl NotificationError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed(message.into())
    }
}
