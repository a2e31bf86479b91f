//! AES-256-GCM page cipher.

use crate::error::{CorruptReason, DbError, DbResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the per-database key derivation salt.
pub const SALT_SIZE: usize = 16;

const KDF_INFO: &[u8] = b"cipherlite-page-key-v1";

/// Page encryption key.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Derives a key from a passphrase and the database salt using HKDF-SHA256.
    ///
    /// HKDF does not stretch low-entropy passphrases; the salt only makes the
    /// derived key unique per database file.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> DbResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut bytes)
            .map_err(|_| DbError::misuse("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Returns the key bytes. Never log the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Authenticated in-place encryption of page bodies.
///
/// Nonce and tag are returned detached so the caller can store them in the
/// page trailer. The associated data binds a ciphertext to its location.
pub struct PageCipher {
    cipher: Aes256Gcm,
}

impl PageCipher {
    /// Creates a cipher for the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts `buf` in place under a fresh random nonce.
    pub fn seal(&self, aad: &[u8], buf: &mut [u8]) -> DbResult<([u8; NONCE_SIZE], [u8; TAG_SIZE])> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buf)
            .map_err(|_| DbError::runtime("page encryption failed"))?;
        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());
        Ok((nonce, tag_bytes))
    }

    /// Decrypts `buf` in place, verifying the tag.
    ///
    /// # Errors
    ///
    /// Returns `Corruption { reason: WrongKey }` when authentication fails; the
    /// buffer contents are unspecified afterwards.
    pub fn open(&self, aad: &[u8], nonce: &[u8], tag: &[u8], buf: &mut [u8]) -> DbResult<()> {
        if nonce.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err(DbError::malformed("bad nonce or tag length"));
        }
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, buf, Tag::from_slice(tag))
            .map_err(|_| DbError::corruption(CorruptReason::WrongKey))
    }
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

/// Returns a fresh random salt for a new encrypted database.
#[must_use]
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(pass: &[u8]) -> PageCipher {
        PageCipher::new(&EncryptionKey::derive_from_passphrase(pass, b"0123456789abcdef").unwrap())
    }

    #[test]
    fn seal_then_open() {
        let c = cipher(b"secret");
        let mut buf = b"page body bytes".to_vec();
        let (nonce, tag) = c.seal(b"page:3", &mut buf).unwrap();
        assert_ne!(buf, b"page body bytes");
        c.open(b"page:3", &nonce, &tag, &mut buf).unwrap();
        assert_eq!(buf, b"page body bytes");
    }

    #[test]
    fn wrong_key_is_reported() {
        let mut buf = vec![7u8; 64];
        let (nonce, tag) = cipher(b"secret").seal(b"", &mut buf).unwrap();
        let err = cipher(b"otherkey").open(b"", &nonce, &tag, &mut buf).unwrap_err();
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::WrongKey));
    }

    #[test]
    fn page_cannot_be_moved() {
        let c = cipher(b"secret");
        let mut buf = vec![1u8; 32];
        let (nonce, tag) = c.seal(&5u32.to_be_bytes(), &mut buf).unwrap();
        assert!(c.open(&6u32.to_be_bytes(), &nonce, &tag, &mut buf).is_err());
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let c = cipher(b"secret");
        let mut a = vec![0u8; 16];
        let mut b = vec![0u8; 16];
        let (na, _) = c.seal(b"", &mut a).unwrap();
        let (nb, _) = c.seal(b"", &mut b).unwrap();
        assert_ne!(na, nb);
        assert_ne!(a, b);
    }

    #[test]
    fn derivation_depends_on_salt() {
        let k1 = EncryptionKey::derive_from_passphrase(b"pw", b"salt-one").unwrap();
        let k2 = EncryptionKey::derive_from_passphrase(b"pw", b"salt-one").unwrap();
        let k3 = EncryptionKey::derive_from_passphrase(b"pw", b"salt-two").unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn derived_key_fills_the_key_size() {
        let key = EncryptionKey::derive_from_passphrase(b"", b"").unwrap();
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn debug_redacts_key() {
        let key = EncryptionKey::derive_from_passphrase(b"pw", b"salt").unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
