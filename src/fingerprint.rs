//! Command fingerprinting for cache entry names

use std::fmt;

use sha2::{Digest, Sha256};

/// File extension of cache entries
pub const ENTRY_EXTENSION: &str = "ts";

/// Deterministic identifier of a command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Compute the SHA-256 fingerprint of a command and its arguments
    ///
    /// The fingerprint includes:
    /// 1. Argument count
    /// 2. Each argument, length-prefixed, in invocation order
    ///
    /// Length prefixes keep `["a b"]` and `["a", "b"]` apart.
    #[must_use]
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Self {
        let mut hasher = Sha256::new();

        hasher.update((argv.len() as u32).to_le_bytes());
        for arg in argv {
            let arg = arg.as_ref();
            hasher.update((arg.len() as u32).to_le_bytes());
            hasher.update(arg.as_bytes());
        }

        Self(hasher.finalize().into())
    }

    /// Wrap a raw digest
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes in hex, for logs
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Entry file name, `<hex>.ts`
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{ENTRY_EXTENSION}", self.to_hex())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}
