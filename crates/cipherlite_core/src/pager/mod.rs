//! Page store.
//!
//! The pager owns the database file, its codec, the shared page cache, and
//! (in WAL mode) the write-ahead log. It hands out [`ReadView`] snapshots and
//! a single [`WriteTxn`] at a time; the lock manager decides when.
//!
//! ## Commit Paths
//!
//! - **Rollback journal**: original images of overwritten pages go to
//!   `<db>-journal` (synced), then new pages and the header are written in
//!   place (synced), then the journal is deleted.
//! - **WAL**: new page images and the header are appended to `<db>-wal` as
//!   one transaction; the database file is untouched until a checkpoint.

mod cache;
mod format;
mod journal;
mod view;

pub use cache::PageRef;
pub use format::{Header, PAGE_SIZE, USABLE_SIZE};
pub use view::{PageRead, PageWrite, ReadView, WriteTxn};

use cache::PageCache;
use format::{codec_for_file, decode_header, decode_page, encode_header, encode_page, Codec};
use journal::Journal;

use crate::config::{Config, JournalMode};
use crate::crypto::random_salt;
use crate::error::{CorruptReason, DbError, DbResult};
use crate::files::{journal_path, wal_path};
use crate::wal::Wal;
use cipherlite_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Shared {
    header: Header,
    wal: Option<Wal>,
}

/// Point-in-time counters for inspection.
#[derive(Debug, Clone, Copy)]
pub struct PagerStats {
    /// Committed header.
    pub header: Header,
    /// Committed WAL frames not yet checkpointed.
    pub wal_frames: u64,
    /// Pages held by the shared cache.
    pub cached_pages: usize,
    /// Cache hits since open.
    pub cache_hits: u64,
    /// Cache misses since open.
    pub cache_misses: u64,
}

/// Shared page store of one database.
pub struct Pager {
    main: Mutex<Box<dyn StorageBackend>>,
    codec: Option<Codec>,
    shared: Mutex<Shared>,
    cache: Mutex<PageCache>,
    journal_path: Option<PathBuf>,
    wal_path: Option<PathBuf>,
    sync_on_commit: bool,
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("encrypted", &self.codec.is_some())
            .field("journal_path", &self.journal_path)
            .finish_non_exhaustive()
    }
}

fn read_page_image(main: &dyn StorageBackend, page: u32) -> DbResult<Vec<u8>> {
    main.read_at(u64::from(page) * PAGE_SIZE as u64, PAGE_SIZE)
        .map_err(|err| match err {
            StorageError::ReadPastEnd { .. } => DbError::corruption(CorruptReason::Truncated { page }),
            other => other.into(),
        })
}

fn remove_if_exists(path: &Path) -> DbResult<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

impl Pager {
    /// Opens the database at `path`, or an in-memory database when `path` is
    /// `None`.
    ///
    /// Rolls back a hot journal and recovers the WAL before returning. A new
    /// database has no schema root yet; see [`Pager::is_new`].
    pub fn open(path: Option<&Path>, passphrase: Option<&str>, config: &Config) -> DbResult<Self> {
        let Some(path) = path else {
            let codec = passphrase
                .map(|p| Codec::new(p, random_salt()))
                .transpose()?;
            return Ok(Self::assemble(
                Box::new(InMemoryBackend::new()),
                codec,
                Header::new(passphrase.is_some()),
                None,
                None,
                None,
                config,
            ));
        };

        if !config.create_if_missing && !path.exists() {
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("database {} does not exist", path.display()),
            )));
        }
        let mut main: Box<dyn StorageBackend> = Box::new(FileBackend::open_with_create_dirs(path)?);
        main.try_lock_exclusive().map_err(|err| match err {
            StorageError::Locked => DbError::DatabaseLocked,
            other => other.into(),
        })?;

        let journal = journal_path(path);
        if journal.exists() {
            let backend = FileBackend::open(&journal)?;
            if let Some(hot) = Journal::read(&backend)? {
                hot.play_back(main.as_mut())?;
            } else {
                debug!(path = %journal.display(), "discarding incomplete journal");
            }
            drop(backend);
            remove_if_exists(&journal)?;
        }

        let size = main.size()?;
        let (codec, mut header) = if size == 0 {
            let codec = passphrase
                .map(|p| Codec::new(p, random_salt()))
                .transpose()?;
            let encrypted = codec.is_some();
            (codec, Header::new(encrypted))
        } else {
            let page0 = main.read_at(0, size.min(PAGE_SIZE as u64) as usize)?;
            let codec = codec_for_file(&page0, passphrase)?;
            let header = decode_header(codec.as_ref(), &page0)?;
            if size < u64::from(header.page_count) * PAGE_SIZE as u64 {
                return Err(DbError::corruption(CorruptReason::Truncated {
                    page: (size / PAGE_SIZE as u64) as u32,
                }));
            }
            (codec, header)
        };

        let wal_file = wal_path(path);
        let wal = if header.wal {
            let wal = Wal::open(Box::new(FileBackend::open(&wal_file)?))?;
            if let Some(frame) = wal.lookup(0, wal.committed_frames()) {
                header = decode_header(codec.as_ref(), &wal.read_image(frame)?)?;
            }
            Some(wal)
        } else {
            remove_if_exists(&wal_file)?;
            None
        };

        info!(
            path = %path.display(),
            pages = header.page_count,
            encrypted = codec.is_some(),
            journal_mode = if header.wal { "wal" } else { "delete" },
            "database opened"
        );
        Ok(Self::assemble(
            main,
            codec,
            header,
            wal,
            Some(journal),
            Some(wal_file),
            config,
        ))
    }

    fn assemble(
        main: Box<dyn StorageBackend>,
        codec: Option<Codec>,
        header: Header,
        wal: Option<Wal>,
        journal_path: Option<PathBuf>,
        wal_path: Option<PathBuf>,
        config: &Config,
    ) -> Self {
        Self {
            main: Mutex::new(main),
            codec,
            shared: Mutex::new(Shared { header, wal }),
            cache: Mutex::new(PageCache::new(config.page_cache_size)),
            journal_path,
            wal_path,
            sync_on_commit: config.sync_on_commit,
        }
    }

    /// Returns true until the first commit creates the schema root.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.shared.lock().header.schema_root == 0
    }

    /// Returns true when pages are sealed by a codec.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.codec.is_some()
    }

    /// Returns true for file-backed databases.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.journal_path.is_some()
    }

    /// Current journal mode.
    #[must_use]
    pub fn journal_mode(&self) -> JournalMode {
        if self.shared.lock().wal.is_some() {
            JournalMode::Wal
        } else {
            JournalMode::Delete
        }
    }

    /// Number of committed frames waiting in the WAL.
    #[must_use]
    pub fn wal_frames(&self) -> u64 {
        self.shared
            .lock()
            .wal
            .as_ref()
            .map_or(0, Wal::committed_frames)
    }

    /// Counters for inspection.
    #[must_use]
    pub fn stats(&self) -> PagerStats {
        let shared = self.shared.lock();
        let cache = self.cache.lock();
        let (cache_hits, cache_misses) = cache.stats();
        PagerStats {
            header: shared.header,
            wal_frames: shared.wal.as_ref().map_or(0, Wal::committed_frames),
            cached_pages: cache.len(),
            cache_hits,
            cache_misses,
        }
    }

    /// Checks that `passphrase` opens this database, as a second opener would.
    pub fn verify_passphrase(&self, passphrase: Option<&str>) -> DbResult<()> {
        let page0 = {
            let main = self.main.lock();
            let size = main.size()?;
            if size == 0 {
                return Ok(());
            }
            main.read_at(0, size.min(PAGE_SIZE as u64) as usize)?
        };
        let codec = codec_for_file(&page0, passphrase)?;
        decode_header(codec.as_ref(), &page0).map(|_| ())
    }

    /// Takes a snapshot of the latest committed state.
    pub fn snapshot(self: &Arc<Self>) -> ReadView {
        let shared = self.shared.lock();
        let max_frame = shared.wal.as_ref().map_or(0, Wal::committed_frames);
        ReadView::new(Arc::clone(self), shared.header, max_frame)
    }

    /// Starts a write transaction on top of the latest committed state.
    pub fn begin_write(self: &Arc<Self>) -> WriteTxn {
        WriteTxn::new(self.snapshot())
    }

    pub(crate) fn read_committed(&self, page: u32, max_frame: u64) -> DbResult<PageRef> {
        {
            let mut shared = self.shared.lock();
            if let Some(wal) = shared.wal.as_mut() {
                if let Some(frame) = wal.lookup(page, max_frame) {
                    if let Some(content) = wal.cached(frame) {
                        return Ok(content);
                    }
                    let raw = wal.read_image(frame)?;
                    let content = Arc::new(decode_page(self.codec.as_ref(), page, raw)?);
                    wal.remember(frame, Arc::clone(&content));
                    return Ok(content);
                }
            }
        }

        if let Some(content) = self.cache.lock().get(page) {
            return Ok(content);
        }
        let raw = read_page_image(self.main.lock().as_ref(), page)?;
        let content = Arc::new(decode_page(self.codec.as_ref(), page, raw)?);
        self.cache.lock().insert(page, Arc::clone(&content));
        Ok(content)
    }

    /// Makes a write transaction durable and visible.
    ///
    /// Returns the number of committed WAL frames afterwards (0 in rollback
    /// mode) so the caller can decide on an automatic checkpoint.
    pub fn commit(&self, txn: WriteTxn) -> DbResult<u64> {
        if !txn.is_dirty() {
            return Ok(self.wal_frames());
        }
        let (base, mut header, dirty) = txn.into_parts();
        let mut shared = self.shared.lock();
        if shared.header != *base.header() {
            return Err(DbError::misuse("write transaction started from a stale snapshot"));
        }
        header.change_counter = header.change_counter.wrapping_add(1);

        if shared.wal.is_some() {
            self.commit_wal(&mut shared, header, &dirty)
        } else {
            self.commit_rollback(&mut shared, header, &dirty)?;
            Ok(0)
        }
    }

    fn commit_wal(
        &self,
        shared: &mut Shared,
        header: Header,
        dirty: &BTreeMap<u32, PageRef>,
    ) -> DbResult<u64> {
        let codec = self.codec.as_ref();
        let mut images = Vec::with_capacity(dirty.len() + 1);
        for (&page, content) in dirty {
            images.push((page, encode_page(codec, page, content)?));
        }
        images.push((0, encode_header(codec, &header)?));

        let wal = shared
            .wal
            .as_mut()
            .ok_or_else(|| DbError::misuse("database is not in WAL mode"))?;
        let first_frame = wal.committed_frames() + 1;
        let committed = wal.append_commit(&images, header.page_count, self.sync_on_commit)?;
        for (offset, content) in dirty.values().enumerate() {
            wal.remember(first_frame + offset as u64, Arc::clone(content));
        }
        shared.header = header;
        debug!(pages = dirty.len(), frames = committed, "committed to WAL");
        Ok(committed)
    }

    fn commit_rollback(
        &self,
        shared: &mut Shared,
        header: Header,
        dirty: &BTreeMap<u32, PageRef>,
    ) -> DbResult<()> {
        let codec = self.codec.as_ref();
        let mut images = Vec::with_capacity(dirty.len());
        for (&page, content) in dirty {
            images.push((page, encode_page(codec, page, content)?));
        }
        let header_image = encode_header(codec, &header)?;

        let mut main = self.main.lock();
        if let Some(path) = &self.journal_path {
            let existing_pages = (main.size()? / PAGE_SIZE as u64) as u32;
            let mut originals = Vec::with_capacity(dirty.len() + 1);
            if existing_pages > 0 {
                originals.push((0, read_page_image(main.as_ref(), 0)?));
            }
            for &page in dirty.keys() {
                if page < existing_pages {
                    originals.push((page, read_page_image(main.as_ref(), page)?));
                }
            }
            let journal = Journal {
                page_count: existing_pages,
                images: originals,
            };
            let mut backend = FileBackend::open(path)?;
            journal.write(&mut backend, self.sync_on_commit)?;
        }

        let written: DbResult<()> = (|| {
            for (page, image) in &images {
                main.write_at(u64::from(*page) * PAGE_SIZE as u64, image)?;
            }
            main.write_at(0, &header_image)?;
            if self.sync_on_commit {
                main.sync()?;
            } else {
                main.flush()?;
            }
            Ok(())
        })();

        if let Err(err) = written {
            warn!(error = %err, "commit failed, restoring from journal");
            self.cache.lock().clear();
            if let Some(path) = &self.journal_path {
                let backend = FileBackend::open(path)?;
                if let Some(journal) = Journal::read(&backend)? {
                    journal.play_back(main.as_mut())?;
                }
                drop(backend);
                remove_if_exists(path)?;
            }
            return Err(err);
        }

        if let Some(path) = &self.journal_path {
            remove_if_exists(path)?;
        }
        let mut cache = self.cache.lock();
        for (&page, content) in dirty {
            cache.insert(page, Arc::clone(content));
        }
        shared.header = header;
        debug!(pages = dirty.len(), "committed through rollback journal");
        Ok(())
    }

    /// Copies the newest WAL images into the database file and resets the
    /// log. The caller guarantees that no reader or writer is active.
    ///
    /// Returns the number of frames transferred.
    pub fn checkpoint(&self) -> DbResult<u64> {
        let mut shared = self.shared.lock();
        self.checkpoint_locked(&mut shared)
    }

    fn checkpoint_locked(&self, shared: &mut Shared) -> DbResult<u64> {
        let Some(wal) = shared.wal.as_mut() else {
            return Ok(0);
        };
        let frames = wal.committed_frames();
        if frames == 0 {
            return Ok(0);
        }
        let latest = wal.latest_frames();
        {
            let mut main = self.main.lock();
            for (page, frame) in &latest {
                let image = wal.read_image(*frame)?;
                main.write_at(u64::from(*page) * PAGE_SIZE as u64, &image)?;
            }
            main.sync()?;
        }
        {
            let mut cache = self.cache.lock();
            for (page, _) in &latest {
                cache.invalidate(*page);
            }
        }
        wal.reset()?;
        info!(frames, pages = latest.len(), "checkpoint complete");
        Ok(frames)
    }

    /// Switches between rollback journal and WAL. The caller guarantees that
    /// no reader or writer is active.
    pub fn set_journal_mode(&self, mode: JournalMode) -> DbResult<()> {
        let mut shared = self.shared.lock();
        let current = if shared.wal.is_some() {
            JournalMode::Wal
        } else {
            JournalMode::Delete
        };
        if current == mode {
            return Ok(());
        }
        let wal_file = self
            .wal_path
            .clone()
            .ok_or_else(|| DbError::misuse("in-memory databases cannot use WAL"))?;

        if mode == JournalMode::Delete {
            self.checkpoint_locked(&mut shared)?;
            shared.wal = None;
            remove_if_exists(&wal_file)?;
        }
        let mut header = shared.header;
        header.change_counter = header.change_counter.wrapping_add(1);
        header.wal = mode == JournalMode::Wal;
        self.commit_rollback(&mut shared, header, &BTreeMap::new())?;
        if mode == JournalMode::Wal {
            shared.wal = Some(Wal::create(Box::new(FileBackend::open(&wal_file)?))?);
        }
        info!(mode = mode.as_str(), "journal mode changed");
        Ok(())
    }

    /// Flushes everything to the database file before the last connection
    /// goes away, then closes the file. In WAL mode this checkpoints and
    /// removes the log.
    ///
    /// The file handle, and with it the advisory lock, is released even when
    /// the final flush fails, so the path can be opened again.
    pub fn shutdown(&self) -> DbResult<()> {
        let flushed = self.flush_for_close();
        // A log that failed to checkpoint stays on disk for the next open.
        self.shared.lock().wal = None;
        let released = std::mem::replace(
            &mut *self.main.lock(),
            Box::new(InMemoryBackend::new()) as Box<dyn StorageBackend>,
        );
        drop(released);
        self.cache.lock().clear();
        flushed
    }

    fn flush_for_close(&self) -> DbResult<()> {
        let mut shared = self.shared.lock();
        if shared.wal.is_some() {
            self.checkpoint_locked(&mut shared)?;
            shared.wal = None;
            if let Some(path) = &self.wal_path {
                remove_if_exists(path)?;
            }
        }
        self.main.lock().sync()?;
        Ok(())
    }
}
