//! Worker-facing API: request, poll, release.
//!
//! All three operations are non-blocking and return immediately; a worker
//! wanting blocking semantics spins on [`Worker::try_get`]. One worker
//! handle is meant to be driven by one process (or thread); completions
//! arrive in no particular order relative to requests.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::{debug, error};

use crate::layout::ArenaView;
use crate::shmobj;

/// Handle to one worker queue.
///
/// Obtained from [`Loader::worker`](crate::Loader::worker) (or
/// [`LoaderHandle::worker`](crate::LoaderHandle::worker)) and valid in the
/// loader process and in any child forked after init. The handle must not
/// outlive the loader's arena mapping in its process.
pub struct Worker {
    view: ArenaView,
    id: usize,
}

// SAFETY: the view's pointees are synchronized by spinlocks and the entry
// ownership cycle; a Worker may be moved to the thread that drives it.
unsafe impl Send for Worker {}

impl Worker {
    pub(crate) fn new(view: ArenaView, id: usize) -> Self {
        Self { view, id }
    }

    /// This worker's queue index.
    pub fn id(&self) -> usize {
        self.id
    }

    /// This worker's queue depth: the bound on its outstanding requests.
    pub fn capacity(&self) -> usize {
        self.view.queue(self.id).capacity as usize
    }

    /// Submits a load request for `path` (at most
    /// [`MAX_PATH_LEN`](crate::MAX_PATH_LEN) bytes; longer paths are
    /// truncated). Returns `false` when all of this worker's entries are
    /// outstanding; the caller retries after a `release`.
    pub fn try_request<P: AsRef<Path>>(&self, path: P) -> bool {
        let queue = self.view.queue(self.id);
        let Some(idx) = queue.free.pop(&self.view) else {
            debug!(worker = self.id, "free list empty, request refused");
            return false;
        };

        // SAFETY: the entry was just popped from free; we own it until the
        // push onto ready.
        let entry = unsafe { self.view.entry_mut(idx) };
        entry.set_path(path.as_ref().as_os_str().as_bytes());
        queue.ready.push(&self.view, idx);
        true
    }

    /// Polls for a finished load. Returns `None` when nothing has
    /// completed. On success the file's bytes are mapped into this process
    /// and exposed through the returned [`Loaded`] handle.
    pub fn try_get(&self) -> Option<Loaded> {
        let queue = self.view.queue(self.id);

        // Racy peek so an idle worker does not hammer the lock; the pop
        // below re-checks under the lock and may still come up empty.
        if queue.completed.appears_empty() {
            return None;
        }
        let idx = queue.completed.pop(&self.view)?;
        debug_assert!(
            idx >= queue.first_entry && idx < queue.first_entry + queue.capacity,
            "completed entry belongs to another queue"
        );

        // SAFETY: popped from completed; we own the entry until it is
        // handed to the caller or pushed back.
        let entry = unsafe { self.view.entry_mut(idx) };
        if let Err(err) = shmobj::worker_open(entry) {
            // The data cannot be served. Drop the object and recycle the
            // slot; the worker observes the request as never completing.
            error!(
                worker = self.id,
                path = %String::from_utf8_lossy(entry.path_bytes()),
                %err,
                "worker-side shm mapping failed, recycling entry"
            );
            shmobj::unlink(entry);
            queue.free.push(&self.view, idx);
            return None;
        }

        Some(Loaded {
            view: self.view,
            idx,
        })
    }
}

/// A completed load: the file's bytes, mapped shared into this process.
///
/// Call [`Loaded::release`] when done; that unlinks the shm object, drops
/// this process's mapping, and recycles the entry. A `Loaded` that is
/// dropped without `release` keeps its entry out of circulation for the
/// loader's lifetime and leaks the named object.
pub struct Loaded {
    view: ArenaView,
    idx: u32,
}

// SAFETY: as for Worker; the handle owns the entry until release.
unsafe impl Send for Loaded {}

impl Loaded {
    fn entry(&self) -> &crate::entry::Entry {
        // SAFETY: the entry is worker-served and this handle is its owner.
        unsafe { self.view.entry_mut(self.idx) }
    }

    /// The path this load was requested with.
    pub fn path(&self) -> &Path {
        Path::new(OsStr::from_bytes(self.entry().path_bytes()))
    }

    /// Mapped length in bytes: the file size rounded up past the 4 KiB
    /// boundary.
    pub fn size(&self) -> u64 {
        self.entry().size
    }

    /// The loaded bytes.
    pub fn data(&self) -> &[u8] {
        let e = self.entry();
        // SAFETY: the worker-side mapping covers `size` bytes and lives
        // until release(), which consumes self.
        unsafe { std::slice::from_raw_parts(e.shm_wdata as *const u8, e.size as usize) }
    }

    /// The loaded bytes, writable (the mapping is shared and
    /// write-enabled; workers may scribble on the buffer before release).
    pub fn data_mut(&mut self) -> &mut [u8] {
        let e = self.entry();
        // SAFETY: as for data(), and &mut self gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(e.shm_wdata as *mut u8, e.size as usize) }
    }

    /// Unlinks the shm object, unmaps it from this process, and returns
    /// the entry to its owner's free list.
    pub fn release(self) {
        // SAFETY: this handle owns the entry until the push below.
        let entry = unsafe { self.view.entry_mut(self.idx) };
        shmobj::worker_release(entry);
        let owner = entry.owner as usize;
        self.view.queue(owner).free.push(&self.view, self.idx);
    }
}
