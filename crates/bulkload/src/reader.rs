//! Reader thread: drains ready requests and submits kernel reads.
//!
//! The reader round-robins the worker queues, popping at most one ready
//! entry per visit so no worker can starve another for more than one lap.
//! Popped requests are not submitted immediately: they are opened, tagged
//! with their first extent's physical address, and staged. When the staging
//! buffer reaches `dispatch_n`, or when the reader has gone
//! `max_idle_iters * n_workers` visits without staging anything new while
//! requests are pending (the idle drain), the batch is sorted ascending by
//! physical address and submitted with a single ring syscall. Sorted
//! submission approximates on-disk order, which cuts seek overhead on
//! rotating media; the idle drain bounds latency when traffic is too thin
//! to fill a batch. `dispatch_n = 1` degenerates to direct per-request
//! submission.

use std::io;

use io_uring::{opcode, types};
use tracing::{debug, error, warn};

use crate::entry::Entry;
use crate::fsinfo;
use crate::loader::LoaderShared;
use crate::shmobj;
use crate::sort::{self, Keyed};

pub(crate) fn run(shared: &LoaderShared) -> ! {
    let view = shared.view;
    let n_workers = view.n_workers();
    let mut staged: Vec<Keyed<u32>> = Vec::with_capacity(view.n_entries());
    let mut idle_iters: usize = 0;
    let mut next_queue: usize = 0;

    loop {
        let drain = idle_iters > shared.cfg.max_idle_iters.saturating_mul(n_workers);
        if !staged.is_empty() && (staged.len() >= shared.cfg.dispatch_n || drain) {
            dispatch(shared, &mut staged);
            idle_iters = 0;
        }

        let id = next_queue;
        next_queue = (next_queue + 1) % n_workers;

        let queue = view.queue(id);
        let Some(idx) = queue.ready.pop(&view) else {
            // Only count idleness while something is waiting to dispatch.
            if !staged.is_empty() {
                idle_iters += 1;
            }
            continue;
        };
        idle_iters = 0;

        // SAFETY: popped from ready; the reader owns the entry until it is
        // staged (then submitted) or pushed back.
        let entry = unsafe { view.entry_mut(idx) };

        let fd = unsafe {
            libc::open(
                entry.path_cstr().as_ptr(),
                libc::O_RDONLY | shared.cfg.open_flags,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            warn!(
                path = %String::from_utf8_lossy(entry.path_bytes()),
                %err,
                "open failed, requeueing request"
            );
            queue.ready.push(&view, idx);
            continue;
        }
        entry.fd = fd;

        entry.lba = match fsinfo::first_extent_lba(fd) {
            Ok(lba) => lba,
            Err(err) => {
                debug!(
                    path = %String::from_utf8_lossy(entry.path_bytes()),
                    %err,
                    "extent query failed, submitting unsorted"
                );
                0
            }
        };
        staged.push(Keyed {
            key: entry.lba,
            data: idx,
        });
    }
}

/// Sorts the staged batch by physical address, prepares each read, and
/// kicks the ring once. Entries whose setup fails are pushed back onto
/// their owner's ready list with the data fd closed.
fn dispatch(shared: &LoaderShared, staged: &mut Vec<Keyed<u32>>) {
    let view = shared.view;
    sort::sort(staged);

    let mut prepared = 0usize;
    for k in staged.iter() {
        let idx = k.data;
        // SAFETY: staged entries are owned by the reader.
        let entry = unsafe { view.entry_mut(idx) };
        match prepare(shared, entry, idx) {
            Ok(()) => prepared += 1,
            Err(err) => {
                warn!(
                    path = %String::from_utf8_lossy(entry.path_bytes()),
                    %err,
                    "read setup failed, requeueing request"
                );
                unsafe { libc::close(entry.fd) };
                entry.fd = -1;
                let owner = entry.owner as usize;
                view.queue(owner).ready.push(&view, idx);
            }
        }
    }

    if prepared > 0 {
        match shared.ring.submit() {
            Ok(n) => debug!(submitted = n, batch = prepared, "batch submitted"),
            Err(err) => error!(%err, "io_uring submit failed"),
        }
    }
    staged.clear();
}

/// Steps a staged entry from "opened" to "in the submission queue": drops a
/// stale loader-side mapping, sizes the read, creates and maps the shm
/// object, and pushes the SQE. Any failure leaves the entry with no shm
/// object state so a retry starts clean.
fn prepare(shared: &LoaderShared, entry: &mut Entry, idx: u32) -> io::Result<()> {
    shmobj::loader_discard(entry);

    let file_len = fsinfo::file_size(entry.fd)?;
    // Round up past the next 4 KiB boundary; a zero-length file still gets
    // one page. Keeps direct I/O alignment workable and block-device
    // arithmetic simple.
    entry.size = (file_len | 0xFFF) + 1;
    if entry.size > shared.cfg.max_file_size {
        return Err(io::Error::from_raw_os_error(libc::E2BIG));
    }

    entry.derive_shm_name();
    shmobj::loader_setup(entry)?;

    let sqe = opcode::Read::new(
        types::Fd(entry.fd),
        entry.shm_ldata as *mut u8,
        entry.size as u32,
    )
    .offset(0)
    .build()
    .user_data(idx as u64);

    // SAFETY: single-submitter discipline; only the reader thread touches
    // the submission side. The buffer and fd outlive the completion: the
    // entry is owned by the ring from here until the responder reaps it.
    let pushed = unsafe {
        let mut sq = shared.ring.submission_shared();
        sq.push(&sqe)
    };
    if pushed.is_err() {
        shmobj::loader_discard(entry);
        shmobj::unlink(entry);
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "submission queue full",
        ));
    }
    Ok(())
}
