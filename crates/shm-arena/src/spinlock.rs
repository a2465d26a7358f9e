//! Cross-process spinlocks.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A word-sized spinlock usable from every process mapping the word.
///
/// Unlike a pthread mutex, a `RawSpinLock` needs no per-process state or
/// shared-attribute initialization: the lock is the atomic word itself, so
/// placing one in shared memory makes it process-shared. Zeroed memory is a
/// valid unlocked lock.
///
/// Intended for critical sections that are branchless and O(1); callers
/// must not perform syscalls while holding the guard.
#[repr(C)]
pub struct RawSpinLock {
    word: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<RawSpinLock>() == 4);

impl RawSpinLock {
    /// A new unlocked lock.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(UNLOCKED),
        }
    }

    /// Re-initializes the lock word in place. Only valid while no other
    /// party can be holding or acquiring the lock.
    #[inline]
    pub fn init(&self) {
        self.word.store(UNLOCKED, Ordering::Release);
    }

    /// Spins until the lock is acquired.
    #[inline]
    pub fn lock(&self) -> SpinGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            // Wait for the holder to release before retrying the CAS, so
            // contending CPUs spin on a local cache line.
            while self.word.load(Ordering::Relaxed) == LOCKED {
                spin_loop();
            }
        }
    }

    /// Attempts to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        match self
            .word
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(SpinGuard { lock: self }),
            Err(_) => None,
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the lock on drop.
pub struct SpinGuard<'a> {
    lock: &'a RawSpinLock,
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.word.store(UNLOCKED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_excludes() {
        let lock = RawSpinLock::new();
        let g = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(g);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn zeroed_is_unlocked() {
        let lock: RawSpinLock = unsafe { core::mem::zeroed() };
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn counter_under_contention() {
        struct Shared {
            lock: RawSpinLock,
            count: core::cell::UnsafeCell<u64>,
        }
        // SAFETY: count is only touched under the lock.
        unsafe impl Sync for Shared {}

        let shared = Arc::new(Shared {
            lock: RawSpinLock::new(),
            count: core::cell::UnsafeCell::new(0),
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        let _g = shared.lock.lock();
                        unsafe { *shared.count.get() += 1 };
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let _g = shared.lock.lock();
        assert_eq!(unsafe { *shared.count.get() }, 40_000);
    }
}
