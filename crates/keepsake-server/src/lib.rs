//! # keepsake-server
//!
//! Backend for the Keepsake digital time capsule application.
//!
//! This crate provides:
//! - **REST API** (axum) for capsule create/list/get/update/delete,
//!   gated by bearer tokens signed by the identity provider
//! - **Media hosting**: uploaded files are ingested into a local store and
//!   served back via durable `/media/...` URLs
//! - **SQLite capsule store** with versioned migrations (via keepsake-store)
//! - **Per-caller rate limiting** to protect against abuse
//!
//! There is no background scheduler: the unlock date is a stored timestamp
//! compared against "now" whenever a capsule is read.

pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod media;
pub mod rate_limit;
