//! The real deployment shape: forked worker processes, a forked loader
//! process, shared state inherited through the arena mapping.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use bulkload::{Loader, LoaderConfig, Worker};
use common::{init_tracing, spin_get, write_patterned};

const GET_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests, retrieves, verifies, and releases every path on one worker.
/// Returns false instead of panicking so forked children can report
/// failure through their exit status.
fn drive_worker(worker: &Worker, paths: &[PathBuf]) -> bool {
    for p in paths {
        let mut accepted = false;
        for _ in 0..1_000_000 {
            if worker.try_request(p) {
                accepted = true;
                break;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
        if !accepted {
            return false;
        }
    }
    for _ in 0..paths.len() {
        let Some(loaded) = spin_get(worker, GET_TIMEOUT) else {
            return false;
        };
        if !paths.iter().any(|p| p == loaded.path()) {
            return false;
        }
        let Ok(expected) = std::fs::read(loaded.path()) else {
            return false;
        };
        if loaded.size() % 4096 != 0 || (loaded.size() as usize) <= expected.len() {
            return false;
        }
        if &loaded.data()[..expected.len()] != expected.as_slice() {
            return false;
        }
        loaded.release();
    }
    true
}

#[test]
fn forked_workers_and_loader() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let w0_paths: Vec<_> = (0..2)
        .map(|i| write_patterned(dir.path(), &format!("w0_{i}.bin"), 6_000, i as u8))
        .collect();
    let w1_paths: Vec<_> = (0..2)
        .map(|i| write_patterned(dir.path(), &format!("w1_{i}.bin"), 9_000, 100 + i as u8))
        .collect();

    let loader = Loader::init(LoaderConfig {
        queue_depth: 2,
        n_workers: 2,
        ..Default::default()
    })
    .unwrap();
    let w0 = loader.worker(0);
    let w1 = loader.worker(1);

    // Loader process: forks off first, so it owns the ring I/O.
    let loader_pid = match unsafe { libc::fork() } {
        0 => loader.start(),
        pid if pid > 0 => pid,
        _ => panic!("fork failed: {}", std::io::Error::last_os_error()),
    };

    // Second worker process.
    let worker_pid = match unsafe { libc::fork() } {
        0 => {
            let ok = drive_worker(&w1, &w1_paths);
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        }
        pid if pid > 0 => pid,
        _ => panic!("fork failed: {}", std::io::Error::last_os_error()),
    };

    // This process is the first worker.
    let parent_ok = drive_worker(&w0, &w0_paths);

    let mut status = 0;
    unsafe { libc::waitpid(worker_pid, &mut status, 0) };
    let child_ok = libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;

    // The loader never returns on its own; reap it explicitly.
    unsafe {
        libc::kill(loader_pid, libc::SIGKILL);
        libc::waitpid(loader_pid, &mut status, 0);
    }

    assert!(parent_ok, "worker 0 failed");
    assert!(child_ok, "worker 1 failed");

    // The arena survives the loader's death in this process; entries that
    // were released are free again.
    assert!(w0.try_request(&w0_paths[0]));
}
