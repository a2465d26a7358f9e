//! Loader construction and thread startup.

use std::sync::Arc;
use std::thread;

use io_uring::IoUring;
use shm_arena::SharedArena;
use tracing::{error, info};

use crate::error::LoaderError;
use crate::layout::{ArenaLayout, ArenaView};
use crate::worker::Worker;
use crate::{reader, responder};

/// Largest submission queue the kernel accepts.
const MAX_SQ_ENTRIES: u32 = 32_768;

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Entries per worker queue; bounds that worker's outstanding requests.
    pub queue_depth: usize,
    /// Largest permitted read after 4 KiB rounding. Oversized files fail
    /// setup and the request is requeued.
    pub max_file_size: u64,
    /// Number of independent worker queues.
    pub n_workers: usize,
    /// Staged-request count that triggers a batch submission.
    pub dispatch_n: usize,
    /// Idle reader laps (scaled by `n_workers`) before a partial batch is
    /// submitted anyway.
    pub max_idle_iters: usize,
    /// Extra flags OR'd into `open(2)` (`O_DIRECT` and friends).
    /// `O_RDONLY` is always present; write access is rejected.
    pub open_flags: i32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            max_file_size: 1 << 30,
            n_workers: 1,
            dispatch_n: 1,
            max_idle_iters: 32,
            open_flags: 0,
        }
    }
}

/// State shared between the loader's two threads (and, via the arena,
/// with every worker process).
pub(crate) struct LoaderShared {
    /// Keeps the mapping alive; all access goes through `view`.
    #[allow(dead_code)]
    arena: SharedArena,
    pub(crate) view: ArenaView,
    pub(crate) ring: IoUring,
    pub(crate) cfg: LoaderConfig,
}

// SAFETY: the arena's structures are synchronized internally; the ring is
// used under a strict split (reader submits, responder completes), which
// io_uring supports without further locking.
unsafe impl Send for LoaderShared {}
unsafe impl Sync for LoaderShared {}

/// The loader: owner of the shared arena and the kernel ring.
///
/// Initialize with [`Loader::init`], fork workers, then either call
/// [`Loader::start`] in the process that will serve I/O, or
/// [`Loader::start_background`] to run both loader threads inside the
/// current process.
pub struct Loader {
    shared: Arc<LoaderShared>,
}

impl Loader {
    /// Allocates the shared arena, initializes every worker queue, and
    /// sets up the ring. Workers must fork after this returns so they
    /// inherit the arena mapping.
    pub fn init(cfg: LoaderConfig) -> Result<Loader, LoaderError> {
        if cfg.n_workers == 0 {
            return Err(LoaderError::InvalidConfig("n_workers must be > 0"));
        }
        if cfg.queue_depth == 0 {
            return Err(LoaderError::InvalidConfig("queue_depth must be > 0"));
        }
        if cfg.dispatch_n == 0 {
            return Err(LoaderError::InvalidConfig("dispatch_n must be > 0"));
        }
        if cfg.open_flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return Err(LoaderError::InvalidConfig(
                "open_flags must not request write access",
            ));
        }
        if cfg.max_file_size < 4096 {
            return Err(LoaderError::InvalidConfig(
                "max_file_size must be at least one page",
            ));
        }
        if cfg.max_file_size > u32::MAX as u64 {
            return Err(LoaderError::InvalidConfig(
                "max_file_size must fit a single read",
            ));
        }

        let layout = ArenaLayout::compute(cfg.n_workers, cfg.queue_depth);
        let arena = SharedArena::alloc_zeroed(layout.total_size).map_err(LoaderError::ArenaSetup)?;
        let view = ArenaView::create(&arena, cfg.n_workers, cfg.queue_depth)?;

        let n_entries = (cfg.n_workers * cfg.queue_depth) as u32;
        let sq_entries = n_entries.next_power_of_two().min(MAX_SQ_ENTRIES);
        let ring = IoUring::new(sq_entries).map_err(LoaderError::RingSetup)?;

        info!(
            n_workers = cfg.n_workers,
            queue_depth = cfg.queue_depth,
            dispatch_n = cfg.dispatch_n,
            arena_bytes = layout.total_size,
            sq_entries,
            "loader initialized"
        );

        Ok(Loader {
            shared: Arc::new(LoaderShared {
                arena,
                view,
                ring,
                cfg,
            }),
        })
    }

    /// Handle for worker queue `id`. Valid in this process and in any
    /// child forked after [`Loader::init`]. Panics on an out-of-range id.
    pub fn worker(&self, id: usize) -> Worker {
        assert!(id < self.shared.view.n_workers(), "worker id out of range");
        Worker::new(self.shared.view, id)
    }

    /// Runs the loader in this process: spawns the reader thread and
    /// becomes the responder. Never returns; the loader's lifecycle ends
    /// with the process.
    pub fn start(self) -> ! {
        let shared = self.shared;
        let for_reader = Arc::clone(&shared);
        if let Err(err) = thread::Builder::new()
            .name("bulkload-reader".into())
            .spawn(move || reader::run(&for_reader))
        {
            error!(%err, "failed to spawn reader thread");
            std::process::exit(1);
        }
        responder::run(&shared)
    }

    /// Runs both loader threads in the background of the current process,
    /// for single-process embedding (workers on threads instead of forked
    /// processes). The returned handle keeps the arena and ring alive.
    pub fn start_background(self) -> LoaderHandle {
        let shared = self.shared;

        let for_reader = Arc::clone(&shared);
        let reader_thread = thread::Builder::new()
            .name("bulkload-reader".into())
            .spawn(move || reader::run(&for_reader));
        let for_responder = Arc::clone(&shared);
        let responder_thread = thread::Builder::new()
            .name("bulkload-responder".into())
            .spawn(move || responder::run(&for_responder));

        if let Err(err) = reader_thread.and(responder_thread) {
            error!(%err, "failed to spawn loader threads");
            std::process::exit(1);
        }
        LoaderHandle { shared }
    }
}

/// Handle to a loader running inside this process.
///
/// The loader threads run until the process exits; dropping the handle
/// does not stop them (there is no request cancellation, and the threads
/// keep the shared state alive through their own references).
pub struct LoaderHandle {
    shared: Arc<LoaderShared>,
}

impl LoaderHandle {
    /// Handle for worker queue `id`. Panics on an out-of-range id.
    pub fn worker(&self, id: usize) -> Worker {
        assert!(id < self.shared.view.n_workers(), "worker id out of range");
        Worker::new(self.shared.view, id)
    }
}
