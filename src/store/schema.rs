//! Database schema for acquisition.db.
//!
//! Table definitions for the acquisition database, one entry per schema
//! version.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

// =============================================================================
// Version 0
// =============================================================================

const BOOKS_TABLE_V0: Table = Table {
    name: "books",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("author", &SqlType::Text),
        sqlite_column!("book_type", &SqlType::Text, non_null = true),
        sqlite_column!("work_source", &SqlType::Text),
        sqlite_column!("work_id", &SqlType::Text),
        sqlite_column!("edition_id", &SqlType::Text),
        sqlite_column!("year", &SqlType::Integer),
        sqlite_column!("publisher", &SqlType::Text),
        sqlite_column!("language", &SqlType::Text),
        sqlite_column!("file_path", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_books_work", "work_id, book_type"),
        ("idx_books_edition", "edition_id, book_type"),
    ],
    unique_constraints: &[],
};

const REQUESTS_TABLE_V0: Table = Table {
    name: "requests",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "book_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "books",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("requester_id", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "retry_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("next_retry_at", &SqlType::Integer),
        sqlite_column!(
            "attention_needed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("issue_description", &SqlType::Text),
        sqlite_column!("language", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_requests_status_created", "status, created_at"),
        ("idx_requests_book", "book_id"),
        ("idx_requests_next_retry", "next_retry_at"),
    ],
    unique_constraints: &[],
};

const SEARCH_RESULTS_TABLE_V0: Table = Table {
    name: "search_results",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "request_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "requests",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("guid", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("indexer", &SqlType::Text),
        sqlite_column!("source", &SqlType::Text, non_null = true),
        sqlite_column!("size_bytes", &SqlType::Integer),
        sqlite_column!("seeders", &SqlType::Integer),
        sqlite_column!("leechers", &SqlType::Integer),
        sqlite_column!("download_url", &SqlType::Text),
        sqlite_column!("magnet_url", &SqlType::Text),
        sqlite_column!("published_at", &SqlType::Integer),
        sqlite_column!("download_type", &SqlType::Text, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!("score", &SqlType::Real, non_null = true, default_value = Some("0")),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("info_url", &SqlType::Text),
    ],
    indices: &[("idx_search_results_request", "request_id")],
    unique_constraints: &[&["request_id", "guid"]],
};

const DOWNLOAD_CLIENTS_TABLE_V0: Table = Table {
    name: "download_clients",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("client_type", &SqlType::Text, non_null = true),
        sqlite_column!("download_type", &SqlType::Text, non_null = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!("category", &SqlType::Text),
        sqlite_column!(
            "priority",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "enabled",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("remote_path", &SqlType::Text),
        sqlite_column!("local_path", &SqlType::Text),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_download_clients_type_priority", "download_type, priority")],
    unique_constraints: &[],
};

const DOWNLOADS_TABLE_V0: Table = Table {
    name: "downloads",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "request_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "requests",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "search_result_id",
            &SqlType::Text,
            foreign_key = Some(&ForeignKey {
                foreign_table: "search_results",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::SetNull,
            })
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("size_bytes", &SqlType::Integer),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "progress",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("external_id", &SqlType::Text),
        sqlite_column!("download_type", &SqlType::Text, non_null = true),
        sqlite_column!("download_path", &SqlType::Text),
        sqlite_column!("client_id", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_downloads_request_status", "request_id, status"),
        ("idx_downloads_status", "status"),
        ("idx_downloads_client", "client_id"),
    ],
    unique_constraints: &[],
};

const SYSTEM_HEALTH_TABLE_V0: Table = Table {
    name: "system_health",
    columns: &[
        sqlite_column!("service", &SqlType::Text, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("message", &SqlType::Text),
        sqlite_column!("last_check_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_success_at", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// Version 1 - search_results.info_url
// =============================================================================

pub const ACQUISITION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        BOOKS_TABLE_V0,
        REQUESTS_TABLE_V0,
        SEARCH_RESULTS_TABLE_V0,
        DOWNLOAD_CLIENTS_TABLE_V0,
        DOWNLOADS_TABLE_V0,
        SYSTEM_HEALTH_TABLE_V0,
    ],
    migration: None,
}];
