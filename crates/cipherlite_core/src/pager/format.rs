//! On-disk page and header layout.
//!
//! ## Header page (page 0)
//!
//! Plaintext database:
//!
//! ```text
//! | fields (64) | crc32(fields) (4) | zero padding |
//! ```
//!
//! Encrypted database:
//!
//! ```text
//! | salt (16) | nonce (12) | tag (16) | sealed fields (64) | zero padding |
//! ```
//!
//! The 64-byte field block always begins with [`MAGIC`], so only plaintext
//! files expose it. Fields are big-endian:
//!
//! ```text
//!  0 magic (16)          24 page_count        40 schema_cookie
//! 16 page_size (4)       28 freelist_head     44 user_version
//! 20 format_version (2)  32 freelist_count    48 change_counter
//! 22 flags (2)           36 schema_root       52 reserved (12)
//! ```
//!
//! ## Data pages
//!
//! ```text
//! | content (USABLE_SIZE) | trailer (RESERVED_SIZE) |
//! ```
//!
//! Plaintext trailers start with a CRC32 over the page number and content.
//! Encrypted trailers hold the GCM nonce and tag; the page number is the
//! associated data, so a page copied to another slot fails authentication.

use crate::checksum::Crc32;
use crate::crypto::{EncryptionKey, PageCipher, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::error::{CorruptReason, DbError, DbResult};

/// Size of every page in the database file.
pub const PAGE_SIZE: usize = 4096;
/// Bytes reserved at the end of each data page for checksum or nonce and tag.
pub const RESERVED_SIZE: usize = NONCE_SIZE + TAG_SIZE;
/// Bytes of content available on each data page.
pub const USABLE_SIZE: usize = PAGE_SIZE - RESERVED_SIZE;
/// Magic string at the start of every plaintext database file.
pub const MAGIC: &[u8; 16] = b"SQLite format 3\0";
/// On-disk format version written by this build.
pub const FORMAT_VERSION: u16 = 1;

const FIELDS_LEN: usize = 64;
const FLAG_ENCRYPTED: u16 = 0x1;
const FLAG_WAL: u16 = 0x2;
const SEALED_OFFSET: usize = SALT_SIZE + NONCE_SIZE + TAG_SIZE;
/// Smallest prefix an encrypted header can occupy.
const ENCRYPTED_HEADER_LEN: usize = SEALED_OFFSET + FIELDS_LEN;

/// Decoded contents of the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Number of pages in the database, including the header page.
    pub page_count: u32,
    /// First page of the free list (0 = empty).
    pub freelist_head: u32,
    /// Number of pages on the free list.
    pub freelist_count: u32,
    /// Root page of the schema tree (0 until created).
    pub schema_root: u32,
    /// Incremented on every schema change.
    pub schema_cookie: u32,
    /// Application-defined version number.
    pub user_version: i32,
    /// Incremented on every commit.
    pub change_counter: u32,
    /// Whether the file is sealed with a page codec.
    pub encrypted: bool,
    /// Whether the database runs in write-ahead log mode.
    pub wal: bool,
}

impl Header {
    /// Header of an empty database holding only page 0.
    #[must_use]
    pub const fn new(encrypted: bool) -> Self {
        Self {
            page_count: 1,
            freelist_head: 0,
            freelist_count: 0,
            schema_root: 0,
            schema_cookie: 0,
            user_version: 0,
            change_counter: 0,
            encrypted,
            wal: false,
        }
    }

    fn fields(&self) -> [u8; FIELDS_LEN] {
        let mut buf = [0u8; FIELDS_LEN];
        let mut flags = 0u16;
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if self.wal {
            flags |= FLAG_WAL;
        }
        buf[0..16].copy_from_slice(MAGIC);
        buf[16..20].copy_from_slice(&(PAGE_SIZE as u32).to_be_bytes());
        buf[20..22].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf[22..24].copy_from_slice(&flags.to_be_bytes());
        buf[24..28].copy_from_slice(&self.page_count.to_be_bytes());
        buf[28..32].copy_from_slice(&self.freelist_head.to_be_bytes());
        buf[32..36].copy_from_slice(&self.freelist_count.to_be_bytes());
        buf[36..40].copy_from_slice(&self.schema_root.to_be_bytes());
        buf[40..44].copy_from_slice(&self.schema_cookie.to_be_bytes());
        buf[44..48].copy_from_slice(&self.user_version.to_be_bytes());
        buf[48..52].copy_from_slice(&self.change_counter.to_be_bytes());
        buf
    }

    fn from_fields(buf: &[u8]) -> DbResult<Self> {
        if buf.len() < FIELDS_LEN || &buf[0..16] != MAGIC {
            return Err(DbError::malformed("header magic mismatch"));
        }
        let page_size = be_u32(buf, 16);
        if page_size as usize != PAGE_SIZE {
            return Err(DbError::malformed(format!("unsupported page size {page_size}")));
        }
        let version = u16::from_be_bytes([buf[20], buf[21]]);
        if version > FORMAT_VERSION {
            return Err(DbError::malformed(format!("unsupported format version {version}")));
        }
        let flags = u16::from_be_bytes([buf[22], buf[23]]);
        let header = Self {
            page_count: be_u32(buf, 24),
            freelist_head: be_u32(buf, 28),
            freelist_count: be_u32(buf, 32),
            schema_root: be_u32(buf, 36),
            schema_cookie: be_u32(buf, 40),
            user_version: be_u32(buf, 44) as i32,
            change_counter: be_u32(buf, 48),
            encrypted: flags & FLAG_ENCRYPTED != 0,
            wal: flags & FLAG_WAL != 0,
        };
        if header.page_count == 0 {
            return Err(DbError::malformed("header reports zero pages"));
        }
        Ok(header)
    }
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Page codec bound to one database file.
pub struct Codec {
    cipher: PageCipher,
    salt: [u8; SALT_SIZE],
}

impl Codec {
    /// Derives the page key for `passphrase` under `salt`.
    pub fn new(passphrase: &str, salt: [u8; SALT_SIZE]) -> DbResult<Self> {
        let key = EncryptionKey::derive_from_passphrase(passphrase.as_bytes(), &salt)?;
        Ok(Self {
            cipher: PageCipher::new(&key),
            salt,
        })
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

/// Picks the codec for an existing file from the first bytes of page 0.
///
/// Only the file's shape is checked here; [`decode_header`] verifies the key.
pub fn codec_for_file(page0: &[u8], passphrase: Option<&str>) -> DbResult<Option<Codec>> {
    let plaintext = page0.starts_with(MAGIC);
    match passphrase {
        None if plaintext => Ok(None),
        None if page0.len() < ENCRYPTED_HEADER_LEN => {
            Err(DbError::corruption(CorruptReason::NotADatabase))
        }
        None => Err(DbError::corruption(CorruptReason::EncryptedNoKey)),
        Some(_) if plaintext => Err(DbError::corruption(CorruptReason::NotEncrypted)),
        Some(_) if page0.len() < ENCRYPTED_HEADER_LEN => {
            Err(DbError::corruption(CorruptReason::NotADatabase))
        }
        Some(passphrase) => {
            let mut salt = [0u8; SALT_SIZE];
            salt.copy_from_slice(&page0[..SALT_SIZE]);
            Codec::new(passphrase, salt).map(Some)
        }
    }
}

/// Serializes the header into a physical page-0 image.
pub fn encode_header(codec: Option<&Codec>, header: &Header) -> DbResult<Vec<u8>> {
    let mut page = vec![0u8; PAGE_SIZE];
    let fields = header.fields();
    match codec {
        None => {
            page[..FIELDS_LEN].copy_from_slice(&fields);
            let mut crc = Crc32::new();
            crc.update(&fields);
            page[FIELDS_LEN..FIELDS_LEN + 4].copy_from_slice(&crc.finish().to_be_bytes());
        }
        Some(codec) => {
            let mut body = fields;
            let (nonce, tag) = codec.cipher.seal(&codec.salt, &mut body)?;
            page[..SALT_SIZE].copy_from_slice(&codec.salt);
            page[SALT_SIZE..SALT_SIZE + NONCE_SIZE].copy_from_slice(&nonce);
            page[SALT_SIZE + NONCE_SIZE..SEALED_OFFSET].copy_from_slice(&tag);
            page[SEALED_OFFSET..ENCRYPTED_HEADER_LEN].copy_from_slice(&body);
        }
    }
    Ok(page)
}

/// Parses a physical page-0 image.
///
/// # Errors
///
/// `WrongKey` when the sealed fields fail authentication; `Malformed` when the
/// plaintext checksum or any field is invalid.
pub fn decode_header(codec: Option<&Codec>, page0: &[u8]) -> DbResult<Header> {
    match codec {
        None => {
            if !page0.starts_with(MAGIC) {
                return Err(DbError::corruption(CorruptReason::NotADatabase));
            }
            if page0.len() < FIELDS_LEN + 4 {
                return Err(DbError::corruption(CorruptReason::Truncated { page: 0 }));
            }
            let mut crc = Crc32::new();
            crc.update(&page0[..FIELDS_LEN]);
            if crc.finish() != be_u32(page0, FIELDS_LEN) {
                return Err(DbError::malformed("header checksum mismatch"));
            }
            Header::from_fields(&page0[..FIELDS_LEN])
        }
        Some(codec) => {
            if page0.len() < ENCRYPTED_HEADER_LEN {
                return Err(DbError::corruption(CorruptReason::Truncated { page: 0 }));
            }
            let mut body = page0[SEALED_OFFSET..ENCRYPTED_HEADER_LEN].to_vec();
            codec.cipher.open(
                &codec.salt,
                &page0[SALT_SIZE..SALT_SIZE + NONCE_SIZE],
                &page0[SALT_SIZE + NONCE_SIZE..SEALED_OFFSET],
                &mut body,
            )?;
            Header::from_fields(&body)
        }
    }
}

fn page_crc(page: u32, content: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(&page.to_be_bytes());
    crc.update(content);
    crc.finish()
}

/// Encodes page content (`USABLE_SIZE` bytes) into a physical page image.
pub fn encode_page(codec: Option<&Codec>, page: u32, content: &[u8]) -> DbResult<Vec<u8>> {
    if content.len() != USABLE_SIZE {
        return Err(DbError::misuse(format!(
            "page content must be {USABLE_SIZE} bytes, got {}",
            content.len()
        )));
    }
    let mut raw = vec![0u8; PAGE_SIZE];
    raw[..USABLE_SIZE].copy_from_slice(content);
    match codec {
        None => {
            let crc = page_crc(page, content);
            raw[USABLE_SIZE..USABLE_SIZE + 4].copy_from_slice(&crc.to_be_bytes());
        }
        Some(codec) => {
            let (nonce, tag) = codec.cipher.seal(&page.to_be_bytes(), &mut raw[..USABLE_SIZE])?;
            raw[USABLE_SIZE..USABLE_SIZE + NONCE_SIZE].copy_from_slice(&nonce);
            raw[USABLE_SIZE + NONCE_SIZE..].copy_from_slice(&tag);
        }
    }
    Ok(raw)
}

/// Decodes a physical page image back into its content.
pub fn decode_page(codec: Option<&Codec>, page: u32, mut raw: Vec<u8>) -> DbResult<Vec<u8>> {
    if raw.len() != PAGE_SIZE {
        return Err(DbError::corruption(CorruptReason::Truncated { page }));
    }
    match codec {
        None => {
            let stored = be_u32(&raw, USABLE_SIZE);
            if stored != page_crc(page, &raw[..USABLE_SIZE]) {
                return Err(DbError::corruption(CorruptReason::Checksum { page }));
            }
        }
        Some(codec) => {
            let (body, trailer) = raw.split_at_mut(USABLE_SIZE);
            let (nonce, tag) = trailer.split_at(NONCE_SIZE);
            codec
                .cipher
                .open(&page.to_be_bytes(), nonce, tag, body)
                .map_err(|_| DbError::Corruption {
                    reason: CorruptReason::Checksum { page },
                    detail: Some("page failed authentication".to_string()),
                })?;
        }
    }
    raw.truncate(USABLE_SIZE);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            page_count: 9,
            freelist_head: 4,
            freelist_count: 2,
            schema_root: 1,
            schema_cookie: 3,
            user_version: -7,
            change_counter: 11,
            encrypted: false,
            wal: true,
        }
    }

    #[test]
    fn plaintext_header_starts_with_magic() {
        let raw = encode_header(None, &sample_header()).unwrap();
        assert_eq!(&raw[..6], b"SQLite");
        assert_eq!(decode_header(None, &raw).unwrap(), sample_header());
    }

    #[test]
    fn damaged_header_is_malformed() {
        let mut raw = encode_header(None, &sample_header()).unwrap();
        raw[30] ^= 0x40;
        let err = decode_header(None, &raw).unwrap_err();
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::Malformed));
    }

    #[test]
    fn garbage_without_key() {
        let err = codec_for_file(b"hello", None).unwrap_err();
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::NotADatabase));
        let err = codec_for_file(&[0xA5; PAGE_SIZE], None).unwrap_err();
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::EncryptedNoKey));
    }

    #[test]
    fn plaintext_page_checksum() {
        let content = vec![0x5A; USABLE_SIZE];
        let mut raw = encode_page(None, 3, &content).unwrap();
        assert_eq!(decode_page(None, 3, raw.clone()).unwrap(), content);

        let err = decode_page(None, 4, raw.clone()).unwrap_err();
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::Checksum { page: 4 }));

        raw[100] ^= 1;
        assert!(decode_page(None, 3, raw).is_err());
    }

    #[test]
    fn short_page_is_truncated() {
        let err = decode_page(None, 2, vec![0; 100]).unwrap_err();
        assert_eq!(err.corrupt_reason(), Some(CorruptReason::Truncated { page: 2 }));
    }

    #[test]
    fn content_must_fill_usable_area() {
        assert!(encode_page(None, 1, &[0u8; 10]).is_err());
    }

    #[cfg(feature = "codec")]
    mod encrypted {
        use super::*;

        fn codec(pass: &str) -> Codec {
            Codec::new(pass, [7u8; SALT_SIZE]).unwrap()
        }

        #[test]
        fn encrypted_header_hides_magic() {
            let c = codec("secret");
            let header = Header {
                encrypted: true,
                ..sample_header()
            };
            let raw = encode_header(Some(&c), &header).unwrap();
            assert_ne!(&raw[..6], b"SQLite");

            let reopened = codec_for_file(&raw, Some("secret")).unwrap().unwrap();
            assert_eq!(decode_header(Some(&reopened), &raw).unwrap(), header);
        }

        #[test]
        fn key_classification() {
            let raw = encode_header(Some(&codec("secret")), &Header::new(true)).unwrap();

            let err = codec_for_file(&raw, None).unwrap_err();
            assert_eq!(err.corrupt_reason(), Some(CorruptReason::EncryptedNoKey));

            let wrong = codec_for_file(&raw, Some("otherkey")).unwrap().unwrap();
            let err = decode_header(Some(&wrong), &raw).unwrap_err();
            assert_eq!(err.corrupt_reason(), Some(CorruptReason::WrongKey));

            let plain = encode_header(None, &Header::new(false)).unwrap();
            let err = codec_for_file(&plain, Some("secret")).unwrap_err();
            assert_eq!(err.corrupt_reason(), Some(CorruptReason::NotEncrypted));
        }

        #[test]
        fn encrypted_page_round_trip_and_binding() {
            let c = codec("secret");
            let content: Vec<u8> = (0..USABLE_SIZE).map(|i| (i % 251) as u8).collect();
            let raw = encode_page(Some(&c), 5, &content).unwrap();
            assert_ne!(&raw[..USABLE_SIZE], content.as_slice());
            assert_eq!(decode_page(Some(&c), 5, raw.clone()).unwrap(), content);

            assert!(decode_page(Some(&c), 6, raw.clone()).is_err());
            assert!(decode_page(Some(&codec("otherkey")), 5, raw).is_err());
        }
    }
}
