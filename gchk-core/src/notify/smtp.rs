//! Email delivery over SMTP

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::{Notification, Notifier, NotifyError};

/// Mail relay connection settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub hostname: String,
    pub port: u16,
    /// Login user, no authentication when empty
    pub user: String,
    pub password: String,
    /// Implicit TLS from the first byte (SMTPS) instead of plain SMTP
    pub use_tls: bool,
    /// Connection and command timeout
    pub timeout: Duration,
}

/// Sends each notification over a fresh SMTP session
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.hostname)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.hostname)
        };

        let mut builder = builder
            .port(self.config.port)
            .timeout(Some(self.config.timeout));

        if !self.config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ));
        }

        Ok(builder.build())
    }
}

/// Build the plain-text message for a notification
pub(crate) fn build_message(notification: &Notification) -> Result<Message, NotifyError> {
    let from = parse_mailbox(&notification.from)?;
    let to = parse_mailbox(&notification.to)?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(notification.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body.clone())?;

    Ok(message)
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = build_message(notification)?;

        // No pooling: the session is closed with QUIT once the message is sent
        let mailer = self.transport()?;
        mailer.send(message).await?;

        info!(
            to = %notification.to,
            subject = %notification.subject,
            relay = %self.config.hostname,
            "Email sent successfully"
        );
        Ok(())
    }
}
