//! Persistent storage for the authenticated backend session.
//!
//! Two storage backends implement [`SecureStorage`]:
//! - [`FileStorage`]: a JSON map on disk (owner-only permissions on unix)
//! - [`MemoryStorage`]: process-local, for tests and offline runs
//!
//! [`SessionVault`] layers typed access to tokens and session metadata on top.

mod file;
mod keys;
mod memory;
mod traits;
mod vault;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::SecureStorage;
pub use vault::{SessionMeta, SessionVault, EXPIRY_SKEW_SECS};

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A lock guarding storage state was poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
