//! # keepsake-shared
//!
//! Access-token types shared between the identity provider tooling and the
//! Keepsake server.
//!
//! The identity provider signs `AccessToken`s with its Ed25519 key; the server
//! verifies them with the corresponding public key configured at startup.
//! Keeping the mint/verify pair in one crate lets server tests issue their own
//! tokens without reimplementing the payload layout.

pub mod token;

mod error;

pub use error::TokenError;
pub use token::{mint_access_token, verify_access_token_with_key, AccessToken};
