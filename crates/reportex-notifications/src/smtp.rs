//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::NotificationError;
use crate::MailService;

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

pub struct SmtpMailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: String,
}

impl SmtpMailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotificationError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotificationError::invalid_config(e.to_string()))?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.from.clone(),
            to: config.to.clone(),
        })
    }
}

#[async_trait]
impl MailService for SmtpMailService {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| NotificationError::invalid_config(format!("from: {e}")))?,
            )
            .to(self
                .to
                .parse()
                .map_err(|e| NotificationError::invalid_config(format!("to: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotificationError::send_failed(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::send_failed(e.to_string()))?;

        Ok(())
    }
}
