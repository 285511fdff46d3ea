//! # keepsake-store
//!
//! Durable capsule storage for the Keepsake server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for the capsule
//! document model. Collection-style fields (`image_urls`, `participants`) are
//! stored as JSON text columns so a capsule round-trips as a single row.

pub mod capsules;
pub mod database;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::Capsule;
