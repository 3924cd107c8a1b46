//! Notification delivery.

use super::models::{Notification, NotificationType};
use tracing::{info, warn};

/// Delivers notifications to requesters. Delivery is best effort and never
/// fails the pipeline stage that emits it.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        let body = notification.body.as_deref().unwrap_or_default();
        match notification.notification_type {
            NotificationType::RequestCompleted => info!(
                "Notify {}: {} ({}) [request {}]",
                notification.requester_id, notification.title, body, notification.request_id
            ),
            NotificationType::AttentionNeeded | NotificationType::RequestFailed => warn!(
                "Notify {}: {}: {} [request {}]",
                notification.requester_id, notification.title, body, notification.request_id
            ),
        }
    }
}
