//! Page encryption codec.
//!
//! Encrypted databases seal every page with AES-256-GCM. The key is derived
//! from the caller's passphrase and a random per-database salt stored at the
//! start of the file. The codec is compiled in with the `codec` feature; without
//! it, opening with a key fails with [`DbError::CodecUnavailable`].
//!
//! [`DbError::CodecUnavailable`]: crate::DbError::CodecUnavailable

#[cfg(feature = "codec")]
mod cipher;

#[cfg(feature = "codec")]
pub use cipher::*;

/// Returns true when this build can open encrypted databases.
#[must_use]
pub const fn has_codec() -> bool {
    cfg!(feature = "codec")
}

/// Module contents when the codec feature is disabled.
#[cfg(not(feature = "codec"))]
mod stub {
    use crate::error::{DbError, DbResult};

    /// Size of the GCM nonce in bytes.
    pub const NONCE_SIZE: usize = 12;
    /// Size of the GCM authentication tag in bytes.
    pub const TAG_SIZE: usize = 16;
    /// Size of the per-database key derivation salt.
    pub const SALT_SIZE: usize = 16;

    /// Encryption key (stub when the codec is disabled).
    #[derive(Debug, Clone)]
    pub struct EncryptionKey {
        _private: (),
    }

    impl EncryptionKey {
        /// Always fails without the codec.
        pub fn derive_from_passphrase(_passphrase: &[u8], _salt: &[u8]) -> DbResult<Self> {
            Err(DbError::CodecUnavailable)
        }
    }

    /// Page cipher (stub when the codec is disabled).
    #[derive(Debug)]
    pub struct PageCipher {
        _private: (),
    }

    impl PageCipher {
        /// Creates the stub cipher; unreachable since no key can exist.
        #[must_use]
        pub fn new(_key: &EncryptionKey) -> Self {
            Self { _private: () }
        }

        /// Always fails without the codec.
        pub fn seal(&self, _aad: &[u8], _buf: &mut [u8]) -> DbResult<([u8; NONCE_SIZE], [u8; TAG_SIZE])> {
            Err(DbError::CodecUnavailable)
        }

        /// Always fails without the codec.
        pub fn open(&self, _aad: &[u8], _nonce: &[u8], _tag: &[u8], _buf: &mut [u8]) -> DbResult<()> {
            Err(DbError::CodecUnavailable)
        }
    }

    /// Always returns zeros without the codec.
    #[must_use]
    pub fn random_salt() -> [u8; SALT_SIZE] {
        [0u8; SALT_SIZE]
    }
}

#[cfg(not(feature = "codec"))]
pub use stub::*;
