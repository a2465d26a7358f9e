//! Responder thread: reaps completions and routes them to workers.

use tracing::error;

use crate::loader::LoaderShared;

/// Consecutive completion failures tolerated before the loader gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 32;

/// Blocks on the ring's completion side forever. Successful reads have
/// their data fd closed (the file is fully in the shm object by now) and
/// are pushed onto the owning worker's completed list; failed reads are
/// logged with enough entry state to diagnose alignment and descriptor
/// problems, and their entries are left off all lists. A long unbroken run
/// of failures ends the loader process.
pub(crate) fn run(shared: &LoaderShared) -> ! {
    let view = shared.view;
    let mut consecutive_failures: u32 = 0;

    loop {
        if let Err(err) = shared.ring.submit_and_wait(1) {
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            error!(%err, "completion wait failed");
            continue;
        }

        // SAFETY: single-completer discipline; only the responder touches
        // the completion side. Draining the iterator advances the cursor.
        let completions: Vec<(u64, i32)> = unsafe {
            shared
                .ring
                .completion_shared()
                .map(|cqe| (cqe.user_data(), cqe.result()))
                .collect()
        };

        for (user_data, result) in completions {
            let idx = user_data as u32;
            // SAFETY: the ring owned this entry from submission until now;
            // the responder is the party that takes ownership back.
            let entry = unsafe { view.entry_mut(idx) };

            if result < 0 {
                let data_page_aligned = entry.shm_ldata % 4096 == 0;
                let size_page_aligned = entry.size % 4096 == 0;
                error!(
                    errno = -result,
                    path = %String::from_utf8_lossy(entry.path_bytes()),
                    fd = entry.fd,
                    shm_lfd = entry.shm_lfd,
                    data_page_aligned,
                    size = entry.size,
                    size_page_aligned,
                    "asynchronous read failed"
                );
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES {
                    error!("persistent completion failures, aborting loader");
                    std::process::exit(1);
                }
                continue;
            }
            consecutive_failures = 0;

            unsafe { libc::close(entry.fd) };
            entry.fd = -1;

            let owner = entry.owner as usize;
            view.queue(owner).completed.push(&view, idx);
        }
    }
}
