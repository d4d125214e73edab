//! Utility functions and helpers
//!
//! This module contains hashing, id generation and the encoding helpers used
//! by the block engine and the storage tables.

pub mod crypto;
pub mod serialization;

pub use crypto::{current_timestamp, new_id, sha256_digest, sha256_hex};

pub use serialization::{canonical_encoding, deserialize, serialize};
