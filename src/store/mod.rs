//! Persistence for the acquisition pipeline.

mod acquisition_store;
pub mod models;
mod schema;

pub use acquisition_store::{AcquisitionStore, SqliteAcquisitionStore};
pub use models::*;
