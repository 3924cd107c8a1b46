//! Bookarr acquisition server library
//!
//! Takes book requests, finds releases through Torznab indexers, hands them
//! to a download client, watches the transfer and files the result into the
//! library. The binary wires these modules together; they are exposed here
//! for integration tests.

pub mod acquisition;
pub mod background_jobs;
pub mod config;
pub mod download_clients;
pub mod duplicates;
pub mod error;
pub mod health;
pub mod library;
pub mod notifications;
pub mod post_processing;
pub mod search;
pub mod sqlite_persistence;
pub mod store;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use acquisition::{AcquisitionEngine, EngineComponents, NewRequest, RequestError};
pub use error::{EngineError, ErrorKind};
pub use store::{AcquisitionStore, SqliteAcquisitionStore};
