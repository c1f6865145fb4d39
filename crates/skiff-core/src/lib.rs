//! Skiff Core - Shared errors, wire protocol, and cryptography
//!
//! This crate provides the building blocks the other skiff crates are
//! assembled from: the error type, the control-message wire format, and
//! the streaming cipher used for replica traffic.

pub mod crypto;
pub mod error;
pub mod proto;

pub use crypto::EncryptionKey;
pub use error::{Error, Result};
