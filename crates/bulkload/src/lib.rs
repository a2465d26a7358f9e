//! Multi-process asynchronous bulk file loader.
//!
//! Worker processes hand filepaths to a single loader process; the loader
//! reads the files through io_uring and returns each file's bytes in a
//! named shared-memory object the worker maps directly. Workers never
//! block on disk: requesting, polling and releasing are all O(1)
//! operations on shared queues.
//!
//! # Architecture
//!
//! ```text
//!   worker process            loader process                  kernel
//!  ┌──────────────┐   ┌──────────────────────────┐      ┌─────────────┐
//!  │ try_request ──┼──► ready ──► reader thread ──┼──SQ──►             │
//!  │              │   │   (open, stage, sort by   │      │  io_uring   │
//!  │              │   │    physical address,      │      │             │
//!  │              │   │    batch submit)          │      │             │
//!  │ try_get   ◄──┼─── completed ◄── responder ◄──┼──CQ──◄             │
//!  │ release   ───┼──► free                       │      └─────────────┘
//!  └──────────────┘   └──────────────────────────┘
//! ```
//!
//! All coordination state lives in one anonymous shared arena allocated at
//! [`Loader::init`]; workers fork afterwards and inherit the mapping. Each
//! worker owns `queue_depth` request slots cycling through three
//! spinlocked FIFO lists (free, ready, completed). File bytes travel
//! through a per-request POSIX shm object created by the loader and
//! unlinked by the worker on release.
//!
//! # Example (single process)
//!
//! ```no_run
//! use bulkload::{Loader, LoaderConfig};
//!
//! let loader = Loader::init(LoaderConfig {
//!     queue_depth: 4,
//!     ..Default::default()
//! })?;
//! let worker = loader.worker(0);
//! let _handle = loader.start_background();
//!
//! assert!(worker.try_request("/etc/hostname"));
//! let loaded = loop {
//!     if let Some(loaded) = worker.try_get() {
//!         break loaded;
//!     }
//!     std::hint::spin_loop();
//! };
//! println!("{} bytes from {}", loaded.size(), loaded.path().display());
//! loaded.release();
//! # Ok::<(), bulkload::LoaderError>(())
//! ```
//!
//! In the multi-process arrangement, call [`Loader::init`], `fork()`
//! workers (each using [`Loader::worker`] with its own id), fork or keep
//! one process for the loader, and call [`Loader::start`] there.

mod entry;
mod error;
mod fsinfo;
mod layout;
mod loader;
mod queue;
mod reader;
mod responder;
mod shmobj;
pub mod sort;
mod worker;

pub use entry::MAX_PATH_LEN;
pub use error::LoaderError;
pub use loader::{Loader, LoaderConfig, LoaderHandle};
pub use worker::{Loaded, Worker};
