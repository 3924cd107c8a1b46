//! Notification data models

use crate::store::{Book, BookType, Request};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    RequestCompleted,
    AttentionNeeded,
    RequestFailed,
}

/// A notification addressed to the requester of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_type: NotificationType,
    pub request_id: String,
    pub requester_id: String,
    pub title: String,
    pub body: Option<String>,
    pub data: serde_json::Value,
    pub created_at: i64,
}

/// Data payload for RequestCompleted notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCompletedData {
    pub book_id: String,
    pub title: String,
    pub author: Option<String>,
    pub book_type: BookType,
    pub file_path: String,
}

impl Notification {
    pub fn completed(request: &Request, book: &Book, file_path: &str, now: i64) -> Self {
        let data = RequestCompletedData {
            book_id: book.id.clone(),
            title: book.title.clone(),
            author: book.author.clone(),
            book_type: book.book_type,
            file_path: file_path.to_string(),
        };
        Self {
            notification_type: NotificationType::RequestCompleted,
            request_id: request.id.clone(),
            requester_id: request.requester_id.clone(),
            title: format!("{} is ready", book.title),
            body: Some(format!("Your {} is now in the library", book.book_type)),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
            created_at: now,
        }
    }

    pub fn attention(request: &Request, message: &str, now: i64) -> Self {
        Self {
            notification_type: NotificationType::AttentionNeeded,
            request_id: request.id.clone(),
            requester_id: request.requester_id.clone(),
            title: "Request needs attention".to_string(),
            body: Some(message.to_string()),
            data: serde_json::Value::Null,
            created_at: now,
        }
    }

    pub fn failed(request: &Request, message: &str, now: i64) -> Self {
        Self {
            notification_type: NotificationType::RequestFailed,
            request_id: request.id.clone(),
            requester_id: request.requester_id.clone(),
            title: "Request failed".to_string(),
            body: Some(message.to_string()),
            data: serde_json::Value::Null,
            created_at: now,
        }
    }
}
