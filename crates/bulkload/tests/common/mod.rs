//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bulkload::{Loaded, Worker};

/// Installs a fmt subscriber honoring `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Spins on `try_get` until a completion arrives or `timeout` elapses.
pub fn spin_get(worker: &Worker, timeout: Duration) -> Option<Loaded> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(loaded) = worker.try_get() {
            return Some(loaded);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}

/// Writes `len` bytes of a position-dependent pattern seeded by `seed`.
pub fn write_patterned(dir: &Path, name: &str, len: usize, seed: u8) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
    fs::write(&path, &data).unwrap();
    path
}

/// Checks a served buffer against the file it was loaded from: the mapping
/// is page-granular and at least as long as the file, and the file's bytes
/// match exactly.
pub fn assert_loaded_matches(loaded: &Loaded, expected: &[u8]) {
    assert_eq!(loaded.size() % 4096, 0, "size must be page-rounded");
    assert!(loaded.size() as usize > expected.len(), "rounding always adds");
    assert_eq!(&loaded.data()[..expected.len()], expected);
}
