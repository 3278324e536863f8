//! Ties the page allocator, swap table, access tracker, and worker pool
//! into the operations `vesper-server` calls around every command (spec
//! §4.9): preload-check before dispatch, a swap-out trigger once
//! `used_memory > vm_max_memory`, and swap-in on access to a swapped key.
//!
//! [`VmEngine`] never touches a [`Database`] across a thread boundary: the
//! worker pool only ever sees plain bytes (spec §4.9's jobs carry
//! already-serialized value bodies), and every place that needs to mutate a
//! `Database` — installing a loaded value, removing a swapped-out one —
//! happens on the caller's thread, either synchronously (blocking mode) or
//! by the caller applying a [`VmEvent`] returned from [`VmEngine::drain_events`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use vesper_io::{FileHandle, IoBackend, OpenFlags};
use vesper_kernel::object::Value;
use vesper_kernel::Database;
use vesper_persistence::rdb::{decode_value_body, encode_value_body};
use vesper_properties::NEVER;
use vesper_types::{DbIndex, Key, UnixTime, ValueType};

use crate::access_tracker::AccessTracker;
use crate::error::{Result, VmError};
use crate::jobs::{JobExecutor, JobId, JobKind, JobOutcome, WorkerPool};
use crate::page_allocator::PageAllocator;
use crate::swap_table::{Residency, SwapEntry, SwapTable};

/// Directives from spec §6's VM table.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub enabled: bool,
    pub swap_path: PathBuf,
    pub page_size: u64,
    pub page_count: u64,
    pub max_memory: u64,
    pub max_threads: usize,
    /// When true, swap-out/swap-in run synchronously on the calling
    /// (main) thread instead of through the worker pool (spec §4.9's
    /// "blocking mode").
    pub blocking: bool,
}

fn page_count_for(byte_len: u64, page_size: u64) -> u64 {
    byte_len.div_ceil(page_size).max(1)
}

struct SwapFile {
    backend: Arc<dyn IoBackend>,
    // The spec's dedicated mutex around the swap file's lseek+write pair.
    handle: Mutex<FileHandle>,
    page_size: u64,
}

impl SwapFile {
    fn open(backend: Arc<dyn IoBackend>, path: &Path, page_size: u64) -> Result<Self> {
        // Not `append_create`: the swap file is addressed purely by fixed
        // page offset (spec §4.9), and `O_APPEND` would make `write_at`
        // ignore that offset and always write at EOF instead.
        let flags = OpenFlags {
            read: true,
            write: true,
            create: true,
            append: false,
            direct: false,
        };
        let handle = backend.open(path, flags)?;
        Ok(Self {
            backend,
            handle: Mutex::new(handle),
            page_size,
        })
    }

    fn write_pages(&self, page: u64, bytes: &[u8]) -> Result<()> {
        let handle = self.handle.lock().unwrap();
        self.backend.write_at(&handle, page * self.page_size, bytes)?;
        Ok(())
    }

    fn read_pages(&self, page: u64, used_pages: u64) -> Result<Vec<u8>> {
        let handle = self.handle.lock().unwrap();
        let mut buf = vec![0u8; (used_pages * self.page_size) as usize];
        self.backend.read_at(&handle, page * self.page_size, &mut buf)?;
        Ok(buf)
    }
}

struct SwapExecutor {
    file: Arc<SwapFile>,
}

impl JobExecutor for SwapExecutor {
    fn execute(&self, kind: &JobKind) -> JobOutcome {
        match kind {
            JobKind::PrepareSwap { value_bytes, .. } => JobOutcome::Prepared {
                page_count: page_count_for(value_bytes.len() as u64, self.file.page_size),
            },
            JobKind::DoSwap { page, value_bytes, .. } => match self.file.write_pages(*page, value_bytes) {
                Ok(()) => JobOutcome::Swapped,
                Err(e) => JobOutcome::Failed { error: e.to_string() },
            },
            JobKind::Load { page, used_pages, .. } => match self.file.read_pages(*page, *used_pages) {
                Ok(bytes) => JobOutcome::Loaded { bytes },
                Err(e) => JobOutcome::Failed { error: e.to_string() },
            },
        }
    }
}

/// A completed (or failed/canceled) piece of VM work the caller must apply
/// back to the right `Database`.
#[derive(Debug)]
pub enum VmEvent {
    ValueLoaded { db: DbIndex, key: Key, value: Value },
    SwapOutCompleted { db: DbIndex, key: Key },
    SwapOutFailed { db: DbIndex, key: Key, reason: String },
    SwapInFailed { db: DbIndex, key: Key, reason: String },
    SwapCanceled { db: DbIndex, key: Key },
}

struct PendingSwapOut {
    prepare_job: JobId,
    do_swap_job: Option<JobId>,
    value_bytes: Vec<u8>,
    value_type: ValueType,
    page: Option<u64>,
}

/// The VM subsystem's live state for one server process: one swap file,
/// one page bitmap, and one swap table shared across every database (spec
/// §4.9 describes a single swap file regardless of `SELECT` count).
pub struct VmEngine {
    config: VmConfig,
    allocator: Mutex<PageAllocator>,
    swap_table: Mutex<SwapTable>,
    access: Mutex<AccessTracker>,
    file: Arc<SwapFile>,
    pool: Option<WorkerPool>,
    pending: Mutex<HashMap<(DbIndex, Key), PendingSwapOut>>,
}

impl VmEngine {
    pub fn open(config: VmConfig, backend: Arc<dyn IoBackend>) -> Result<Self> {
        let file = Arc::new(SwapFile::open(Arc::clone(&backend), &config.swap_path, config.page_size)?);
        let pool = if config.blocking {
            None
        } else {
            Some(WorkerPool::new(
                config.max_threads,
                Arc::new(SwapExecutor { file: Arc::clone(&file) }),
            ))
        };
        Ok(Self {
            allocator: Mutex::new(PageAllocator::new(config.page_count)),
            swap_table: Mutex::new(SwapTable::new()),
            access: Mutex::new(AccessTracker::new()),
            file,
            pool,
            pending: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn max_memory(&self) -> u64 {
        self.config.max_memory
    }

    pub fn touch(&self, db: DbIndex, key: &[u8], now: UnixTime) {
        self.access.lock().unwrap().touch(db, key, now);
    }

    pub fn is_swapped(&self, db: DbIndex, key: &[u8]) -> bool {
        self.swap_table.lock().unwrap().is_swapped(db, key)
    }

    /// Preload check (spec §4.1 dispatch step 10, §4.9): if `key` is
    /// swapped, either resolves it synchronously (blocking mode) or begins
    /// a `LOAD` job and reports that the client must block. Returns `true`
    /// iff the caller must suspend the client on swap-in.
    pub fn preload(&self, db: &mut Database, db_index: DbIndex, key: &[u8], now: UnixTime) -> Result<bool> {
        if !self.swap_table.lock().unwrap().is_swapped(db_index, key) {
            return Ok(false);
        }
        if self.config.blocking {
            self.swap_in_blocking(db, db_index, key)?;
            return Ok(false);
        }
        self.begin_swap_in(db_index, key)?;
        Ok(true)
    }

    fn swap_in_blocking(&self, db: &mut Database, db_index: DbIndex, key: &[u8]) -> Result<()> {
        let entry = self
            .swap_table
            .lock()
            .unwrap()
            .remove(db_index, key)
            .ok_or(VmError::NotSwapped)?;
        let bytes = self.file.read_pages(entry.page, entry.used_pages)?;
        let mut pos = 0;
        let value = decode_value_body(entry.swapped_type, &bytes, &mut pos)?;
        self.allocator.lock().unwrap().free(entry.page, entry.used_pages);
        db.set(key.to_vec(), value);
        Ok(())
    }

    fn begin_swap_in(&self, db: DbIndex, key: &[u8]) -> Result<JobId> {
        let pool = self.pool.as_ref().expect("threaded mode always has a worker pool");
        let entry = self
            .swap_table
            .lock()
            .unwrap()
            .get(db, key)
            .cloned()
            .ok_or(VmError::NotSwapped)?;
        self.swap_table.lock().unwrap().set_residency(db, key, Residency::LoadingIn);
        Ok(pool.submit(JobKind::Load {
            db,
            key: key.to_vec(),
            page: entry.page,
            used_pages: entry.used_pages,
            value_type: entry.swapped_type,
        }))
    }

    /// Blocking-mode swap-out (spec §4.9): samples candidates, serializes
    /// the chosen value, writes it in place, and removes it from `db`.
    pub fn swap_out_blocking(&self, db: &mut Database, db_index: DbIndex, now: UnixTime) -> Result<Option<Key>> {
        if !self.config.blocking {
            return Ok(None);
        }
        let Some((chosen, value)) = self.pick_candidate(db, db_index, now) else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        encode_value_body(&value, false, &mut bytes);
        let page_count = page_count_for(bytes.len() as u64, self.file.page_size);
        let page = {
            let mut allocator = self.allocator.lock().unwrap();
            allocator.allocate(page_count).ok_or(VmError::SwapFileFull { needed: page_count })?
        };
        self.file.write_pages(page, &bytes)?;
        db.remove(&chosen);
        self.swap_table.lock().unwrap().insert(
            db_index,
            chosen.clone(),
            SwapEntry {
                page,
                used_pages: page_count,
                atime: now,
                swapped_type: value.value_type(),
                residency: Residency::Swapped,
            },
        );
        self.access.lock().unwrap().forget(db_index, &chosen);
        Ok(Some(chosen))
    }

    /// Threaded-mode swap-out: submits a `PREPARE_SWAP` job and registers
    /// the pending state; the value stays resident in `db` until the
    /// caller applies the [`VmEvent::SwapOutCompleted`] event that
    /// eventually arrives from [`VmEngine::drain_events`].
    pub fn begin_swap_out(&self, db: &Database, db_index: DbIndex, now: UnixTime) -> Option<Key> {
        let pool = self.pool.as_ref()?;
        let (chosen, value) = self.pick_candidate(db, db_index, now)?;
        let mut bytes = Vec::new();
        encode_value_body(&value, false, &mut bytes);
        let value_type = value.value_type();
        let id = pool.submit(JobKind::PrepareSwap {
            db: db_index,
            key: chosen.clone(),
            value_bytes: bytes.clone(),
        });
        self.pending.lock().unwrap().insert(
            (db_index, chosen.clone()),
            PendingSwapOut {
                prepare_job: id,
                do_swap_job: None,
                value_bytes: bytes,
                value_type,
                page: None,
            },
        );
        Some(chosen)
    }

    fn pick_candidate(&self, db: &Database, db_index: DbIndex, now: UnixTime) -> Option<(Key, Value)> {
        let candidate_keys: Vec<Key> = db.keys().take(5).cloned().collect();
        let candidates: Vec<(Key, Value)> = candidate_keys
            .into_iter()
            .filter_map(|key| db.peek(&key).map(|value| (key.clone(), value.clone())))
            .collect();
        let chosen = {
            let access = self.access.lock().unwrap();
            access.best_swap_candidate(db_index, candidates.iter().map(|(key, value)| (key, value)), now)?
        };
        let value = candidates.into_iter().find(|(key, _)| *key == chosen)?.1;
        NEVER!(value.refcount > 1, "swap-out candidate has refcount>1");
        Some((chosen, value))
    }

    /// Cancels an in-flight swap-out or swap-in for `key` (spec §4.9's
    /// `vmCancelThreadedIOJob`), if one exists. Returns whether anything
    /// was found to cancel.
    pub fn cancel_swap_out(&self, db: DbIndex, key: &[u8]) -> bool {
        let Some(pool) = &self.pool else { return false };
        let job_id = {
            let pending = self.pending.lock().unwrap();
            pending
                .get(&(db, key.to_vec()))
                .map(|pending| pending.do_swap_job.unwrap_or(pending.prepare_job))
        };
        match job_id {
            Some(id) => pool.cancel(id),
            None => false,
        }
    }

    /// Drains completed jobs (spec §4.9's `floor(processed_count × 1%)`
    /// formula) and turns each into a [`VmEvent`] the caller applies to the
    /// right `Database`. Call once per `beforeSleep` iteration.
    pub fn drain_events(&self) -> Vec<VmEvent> {
        let Some(pool) = &self.pool else { return Vec::new() };
        let mut events = Vec::new();
        for (id, db, key, outcome) in pool.drain_completions() {
            match outcome {
                JobOutcome::Prepared { page_count } => self.on_prepared(pool, id, db, &key, page_count, &mut events),
                JobOutcome::Swapped => self.on_swapped(db, &key, &mut events),
                JobOutcome::Loaded { bytes } => self.on_loaded(db, &key, &bytes, &mut events),
                JobOutcome::Canceled => self.on_canceled(db, &key, &mut events),
                JobOutcome::Failed { error } => self.on_failed(id, db, &key, error, &mut events),
            }
        }
        events
    }

    fn on_prepared(&self, pool: &WorkerPool, id: JobId, db: DbIndex, key: &[u8], page_count: u64, events: &mut Vec<VmEvent>) {
        let mut pending = self.pending.lock().unwrap();
        let Some(entry) = pending.get_mut(&(db, key.to_vec())) else { return };
        if entry.prepare_job != id {
            return;
        }
        let page = self.allocator.lock().unwrap().allocate(page_count);
        match page {
            Some(page) => {
                entry.page = Some(page);
                let do_swap_id = pool.submit(JobKind::DoSwap {
                    db,
                    key: key.to_vec(),
                    page,
                    value_bytes: entry.value_bytes.clone(),
                });
                entry.do_swap_job = Some(do_swap_id);
            }
            None => {
                pending.remove(&(db, key.to_vec()));
                events.push(VmEvent::SwapOutFailed {
                    db,
                    key: key.to_vec(),
                    reason: "swap file has no contiguous free span".to_string(),
                });
            }
        }
    }

    fn on_swapped(&self, db: DbIndex, key: &[u8], events: &mut Vec<VmEvent>) {
        let Some(entry) = self.pending.lock().unwrap().remove(&(db, key.to_vec())) else { return };
        let Some(page) = entry.page else { return };
        let used_pages = page_count_for(entry.value_bytes.len() as u64, self.file.page_size);
        self.swap_table.lock().unwrap().insert(
            db,
            key.to_vec(),
            SwapEntry {
                page,
                used_pages,
                atime: UnixTime::now(),
                swapped_type: entry.value_type,
                residency: Residency::Swapped,
            },
        );
        self.access.lock().unwrap().forget(db, key);
        events.push(VmEvent::SwapOutCompleted { db, key: key.to_vec() });
    }

    fn on_loaded(&self, db: DbIndex, key: &[u8], bytes: &[u8], events: &mut Vec<VmEvent>) {
        let Some(entry) = self.swap_table.lock().unwrap().remove(db, key) else { return };
        self.allocator.lock().unwrap().free(entry.page, entry.used_pages);
        let mut pos = 0;
        match decode_value_body(entry.swapped_type, bytes, &mut pos) {
            Ok(value) => events.push(VmEvent::ValueLoaded { db, key: key.to_vec(), value }),
            Err(e) => events.push(VmEvent::SwapInFailed { db, key: key.to_vec(), reason: e.to_string() }),
        }
    }

    fn on_canceled(&self, db: DbIndex, key: &[u8], events: &mut Vec<VmEvent>) {
        if let Some(entry) = self.pending.lock().unwrap().remove(&(db, key.to_vec())) {
            if let Some(page) = entry.page {
                let used_pages = page_count_for(entry.value_bytes.len() as u64, self.file.page_size);
                self.allocator.lock().unwrap().free(page, used_pages);
            }
        }
        self.swap_table.lock().unwrap().remove(db, key);
        events.push(VmEvent::SwapCanceled { db, key: key.to_vec() });
    }

    /// A failed `PrepareSwap`/`DoSwap` leaves the value resident (it's only
    /// ever removed from `db` once `on_swapped` sees success), so the
    /// caller's next swap-out sweep simply retries it; a failed `Load`
    /// leaves the key swapped, so the caller must retry the read.
    fn on_failed(&self, job_id: JobId, db: DbIndex, key: &[u8], error: String, events: &mut Vec<VmEvent>) {
        let was_swap_out = {
            let mut pending = self.pending.lock().unwrap();
            match pending.get(&(db, key.to_vec())) {
                Some(entry) if entry.prepare_job == job_id || entry.do_swap_job == Some(job_id) => {
                    pending.remove(&(db, key.to_vec()));
                    true
                }
                _ => false,
            }
        };
        if was_swap_out {
            tracing::warn!(db = %db, key = %String::from_utf8_lossy(key), %error, "vm swap-out job failed");
            events.push(VmEvent::SwapOutFailed { db, key: key.to_vec(), reason: error });
        } else {
            self.swap_table.lock().unwrap().set_residency(db, key, Residency::Swapped);
            tracing::warn!(db = %db, key = %String::from_utf8_lossy(key), %error, "vm swap-in job failed");
            events.push(VmEvent::SwapInFailed { db, key: key.to_vec(), reason: error });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_io::SyncBackend;
    use vesper_kernel::object::StringData;

    fn config(dir: &tempfile::TempDir, blocking: bool) -> VmConfig {
        VmConfig {
            enabled: true,
            swap_path: dir.path().join("swap.bin"),
            page_size: 64,
            page_count: 64,
            max_memory: 1024,
            max_threads: 2,
            blocking,
        }
    }

    #[test]
    fn blocking_swap_out_then_preload_round_trips_the_value() {
        let dir = tempfile::tempdir().unwrap();
        let engine = VmEngine::open(config(&dir, true), Arc::new(SyncBackend::new())).unwrap();
        let db_index = DbIndex::new(0);
        let mut db = Database::new(db_index);
        db.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"hello".to_vec())));
        engine.touch(db_index, b"k", UnixTime::from_secs(0));

        let swapped = engine.swap_out_blocking(&mut db, db_index, UnixTime::from_secs(1000)).unwrap();
        assert_eq!(swapped, Some(b"k".to_vec()));
        assert!(!db.contains(b"k"));
        assert!(engine.is_swapped(db_index, b"k"));

        let blocked = engine.preload(&mut db, db_index, b"k", UnixTime::from_secs(1001)).unwrap();
        assert!(!blocked);
        assert!(!engine.is_swapped(db_index, b"k"));
        assert_eq!(db.peek(b"k").unwrap().as_string().unwrap().as_bytes(), b"hello");
    }

    #[test]
    fn threaded_swap_out_completes_asynchronously() {
        let dir = tempfile::tempdir().unwrap();
        let engine = VmEngine::open(config(&dir, false), Arc::new(SyncBackend::new())).unwrap();
        let db_index = DbIndex::new(0);
        let db = Database::new(db_index);
        let mut db = db;
        db.set(b"k".to_vec(), Value::string(StringData::from_bytes(b"hello".to_vec())));
        engine.touch(db_index, b"k", UnixTime::from_secs(0));

        let started = engine.begin_swap_out(&db, db_index, UnixTime::from_secs(1000));
        assert_eq!(started, Some(b"k".to_vec()));

        let mut completed = false;
        for _ in 0..200 {
            for event in engine.drain_events() {
                if let VmEvent::SwapOutCompleted { key, .. } = event {
                    assert_eq!(key, b"k".to_vec());
                    completed = true;
                }
            }
            if completed {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(completed, "swap-out never completed");
        assert!(engine.is_swapped(db_index, b"k"));
    }
}
