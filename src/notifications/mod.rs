//! Requester notifications for pipeline outcomes.

mod models;
mod service;

pub use models::{Notification, NotificationType, RequestCompletedData};
pub use service::{Notifier, TracingNotifier};
