//! Operator notifications
//!
//! Events worth a human's attention (probe failure, drain result) are sent
//! as plain-text emails carrying the full command report.

mod mock;
mod smtp;

pub use mock::RecordingNotifier;
pub use smtp::{SmtpConfig, SmtpNotifier};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::metrics::MetricsRegistry;

/// A single outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Errors from notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Sender or recipient is not a valid mailbox
    #[error("Invalid email address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    /// The message could not be assembled
    #[error("Failed to build email message: {0}")]
    Build(#[from] lettre::error::Error),

    /// The relay refused the connection, login or message
    #[error("SMTP delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// Other delivery failures
    #[error("{0}")]
    Other(String),
}

/// Delivers a notification.
///
/// Failures are returned to the caller rather than swallowed, since a lost
/// message means operators never learn about a drained node.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Addressing and signature applied to every operator email
#[derive(Debug, Clone, Default)]
pub struct EmailSettings {
    pub to: String,
    pub from: String,
    pub signature: String,
}

/// Append the configured signature block to a report
pub fn compose_body(report: &str, signature: &str) -> String {
    format!("{}\n{}", report, signature)
}

/// Sends operator alerts through a [`Notifier`], or only logs them when
/// email is disabled.
pub struct AlertMailer {
    notifier: Option<Arc<dyn Notifier>>,
    settings: EmailSettings,
    metrics: Arc<MetricsRegistry>,
}

impl AlertMailer {
    /// Create a mailer that delivers through `notifier`
    pub fn new(
        notifier: Arc<dyn Notifier>,
        settings: EmailSettings,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            notifier: Some(notifier),
            settings,
            metrics,
        }
    }

    /// Create a mailer that never sends anything
    pub fn disabled(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            notifier: None,
            settings: EmailSettings::default(),
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Send `report` to the operators under `subject`
    pub async fn send(&self, subject: &str, report: &str) -> Result<(), NotifyError> {
        let Some(notifier) = &self.notifier else {
            debug!(subject = subject, "Email disabled, not sending notification");
            return Ok(());
        };

        let notification = Notification {
            to: self.settings.to.clone(),
            from: self.settings.from.clone(),
            subject: subject.to_string(),
            body: compose_body(report, &self.settings.signature),
        };

        info!(
            to = %notification.to,
            from = %notification.from,
            subject = %notification.subject,
            "Sending email"
        );

        let result = notifier.notify(&notification).await;
        self.metrics.inc_notification(result.is_ok());
        result
    }

    /// Send and log a failure instead of returning it
    pub async fn send_logged(&self, subject: &str, report: &str) -> bool {
        match self.send(subject, report).await {
            Ok(()) => true,
            Err(e) => {
                error!(subject = subject, error = %e, "Failed to send notification");
                false
            }
        }
    }
}
