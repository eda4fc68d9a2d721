//! Recording notifier for testing

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Notification, Notifier, NotifyError};

/// Notifier that keeps every message in memory instead of sending it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<Notification>>,
    /// Configurable delivery failure simulation
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notifier that rejects every message
    pub fn failing() -> Self {
        let notifier = Self::new();
        notifier.set_fail(true);
        notifier
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Messages delivered so far (rejected ones are recorded too)
    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.write().await.push(notification.clone());

        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Other("Mock relay rejected message".to_string()));
        }
        Ok(())
    }
}
