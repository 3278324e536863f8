//! Threaded job queue for swap-out/swap-in I/O (spec §4.9).
//!
//! Jobs move through three conceptual lists — `new`, `processing`,
//! `processed` — guarded by one mutex, exactly as spec §4.9 describes
//! ("round-robined between the three internal lists... under one mutex").
//! Completion is signalled to the main loop over a channel standing in for
//! the spec's pipe-byte-token: a bounded OS pipe needs raw fd plumbing this
//! workspace's `unsafe_code = "deny"` lint forbids, and a channel gives the
//! same "poll, then drain a bounded batch" shape without it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use vesper_types::{DbIndex, Key, ValueType};

pub type JobId = u64;

/// One unit of VM I/O work (spec §4.9's `PREPARE_SWAP`/`DO_SWAP`/`LOAD`).
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Computes the page count a value would need once serialized, without
    /// writing it yet.
    PrepareSwap { db: DbIndex, key: Key, value_bytes: Vec<u8> },
    /// Writes a value's serialized bytes to its already-allocated pages.
    DoSwap { db: DbIndex, key: Key, page: u64, value_bytes: Vec<u8> },
    /// Reads a swapped value's bytes back from its pages.
    Load { db: DbIndex, key: Key, page: u64, used_pages: u64, value_type: ValueType },
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Prepared { page_count: u64 },
    Swapped,
    Loaded { bytes: Vec<u8> },
    Canceled,
    Failed { error: String },
}

/// Executes one job's I/O. Implemented by `vesper-vm::engine`'s swap-file
/// executor; kept as a trait so the queueing/cancellation machinery here
/// has no direct dependency on the swap file's on-disk layout.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(&self, kind: &JobKind) -> JobOutcome;
}

fn job_db_key(kind: &JobKind) -> (DbIndex, Key) {
    match kind {
        JobKind::PrepareSwap { db, key, .. }
        | JobKind::DoSwap { db, key, .. }
        | JobKind::Load { db, key, .. } => (*db, key.clone()),
    }
}

struct PendingJob {
    id: JobId,
    kind: JobKind,
}

struct Lists {
    new: VecDeque<PendingJob>,
    processing: HashSet<JobId>,
    processed: HashMap<JobId, (DbIndex, Key, JobOutcome)>,
}

/// A bounded pool of worker threads draining one shared job queue (spec
/// §4.9's VM worker pool).
pub struct WorkerPool {
    lists: Arc<Mutex<Lists>>,
    not_empty: Arc<Condvar>,
    next_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    completion_rx: Receiver<JobId>,
}

impl WorkerPool {
    pub fn new(max_threads: usize, executor: Arc<dyn JobExecutor>) -> Self {
        let lists = Arc::new(Mutex::new(Lists {
            new: VecDeque::new(),
            processing: HashSet::new(),
            processed: HashMap::new(),
        }));
        let not_empty = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (completion_tx, completion_rx) = channel();
        let mut workers = Vec::with_capacity(max_threads);
        for _ in 0..max_threads {
            let lists = Arc::clone(&lists);
            let not_empty = Arc::clone(&not_empty);
            let shutdown = Arc::clone(&shutdown);
            let executor = Arc::clone(&executor);
            let tx = completion_tx.clone();
            workers.push(std::thread::spawn(move || worker_loop(lists, not_empty, shutdown, executor, tx)));
        }
        Self {
            lists,
            not_empty,
            next_id: AtomicU64::new(1),
            shutdown,
            workers,
            completion_rx,
        }
    }

    pub fn submit(&self, kind: JobKind) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut lists = self.lists.lock().unwrap();
        lists.new.push_back(PendingJob { id, kind });
        drop(lists);
        self.not_empty.notify_one();
        id
    }

    /// Non-blocking check for the pipe-byte-token stand-in: `true` if at
    /// least one job finished since the last call.
    pub fn poll_completion_token(&self) -> bool {
        let mut saw_any = false;
        while self.completion_rx.try_recv().is_ok() {
            saw_any = true;
        }
        saw_any
    }

    /// Drains up to `floor(processed_count × 1%).max(1)` completed jobs per
    /// call, exactly the main-loop formula spec §4.9 describes.
    pub fn drain_completions(&self) -> Vec<(JobId, DbIndex, Key, JobOutcome)> {
        let mut lists = self.lists.lock().unwrap();
        let processed_count = lists.processed.len();
        if processed_count == 0 {
            return Vec::new();
        }
        let budget = ((processed_count as f64 * 0.01).floor() as usize).max(1);
        let ids: Vec<JobId> = lists.processed.keys().take(budget).copied().collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((db, key, outcome)) = lists.processed.remove(&id) {
                out.push((id, db, key, outcome));
            }
        }
        out
    }

    /// Spec §4.9's `vmCancelThreadedIOJob`: if `id` is still queued, removes
    /// it directly; if it's being executed, spins (100 µs sleep) until it
    /// moves to `processed`, then marks its outcome canceled. Returns
    /// whether the job was found at all.
    pub fn cancel(&self, id: JobId) -> bool {
        loop {
            let mut lists = self.lists.lock().unwrap();
            if let Some(pos) = lists.new.iter().position(|job| job.id == id) {
                let job = lists.new.remove(pos).unwrap();
                let (db, key) = job_db_key(&job.kind);
                lists.processed.insert(id, (db, key, JobOutcome::Canceled));
                return true;
            }
            if lists.processing.contains(&id) {
                drop(lists);
                std::thread::sleep(Duration::from_micros(100));
                continue;
            }
            if let Some(entry) = lists.processed.get_mut(&id) {
                entry.2 = JobOutcome::Canceled;
                return true;
            }
            return false;
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    lists: Arc<Mutex<Lists>>,
    not_empty: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    executor: Arc<dyn JobExecutor>,
    tx: Sender<JobId>,
) {
    loop {
        let job = {
            let mut guard = lists.lock().unwrap();
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(job) = guard.new.pop_front() {
                    guard.processing.insert(job.id);
                    break job;
                }
                guard = not_empty.wait_timeout(guard, Duration::from_millis(200)).unwrap().0;
            }
        };
        let outcome = executor.execute(&job.kind);
        let (db, key) = job_db_key(&job.kind);
        {
            let mut guard = lists.lock().unwrap();
            guard.processing.remove(&job.id);
            guard.processed.insert(job.id, (db, key, outcome));
        }
        let _ = tx.send(job.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoExecutor;
    impl JobExecutor for EchoExecutor {
        fn execute(&self, kind: &JobKind) -> JobOutcome {
            match kind {
                JobKind::PrepareSwap { value_bytes, .. } => JobOutcome::Prepared {
                    page_count: value_bytes.len() as u64,
                },
                JobKind::DoSwap { .. } => JobOutcome::Swapped,
                JobKind::Load { .. } => JobOutcome::Loaded { bytes: vec![1, 2, 3] },
            }
        }
    }

    #[test]
    fn submitted_job_eventually_appears_in_drained_completions() {
        let pool = WorkerPool::new(2, Arc::new(EchoExecutor));
        let id = pool.submit(JobKind::DoSwap {
            db: DbIndex::new(0),
            key: b"k".to_vec(),
            page: 0,
            value_bytes: vec![1],
        });
        let mut found = None;
        for _ in 0..200 {
            let drained = pool.drain_completions();
            if let Some(entry) = drained.into_iter().find(|(job_id, ..)| *job_id == id) {
                found = Some(entry);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let (_, _, _, outcome) = found.expect("job should complete");
        assert!(matches!(outcome, JobOutcome::Swapped));
    }

    #[test]
    fn canceling_a_queued_job_marks_it_canceled_without_running_it() {
        let pool = WorkerPool::new(0, Arc::new(EchoExecutor));
        // zero live workers: job stays in `new` until we cancel it
        let id = pool.submit(JobKind::Load {
            db: DbIndex::new(0),
            key: b"k".to_vec(),
            page: 0,
            used_pages: 1,
            value_type: ValueType::String,
        });
        assert!(pool.cancel(id));
        let drained = pool.drain_completions();
        let (_, _, _, outcome) = drained.into_iter().find(|(job_id, ..)| *job_id == id).unwrap();
        assert!(matches!(outcome, JobOutcome::Canceled));
    }
}
