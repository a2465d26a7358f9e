//! Per-worker queues and their FIFO lists.
//!
//! Each worker owns `queue_depth` entries and three lists: `free`, `ready`
//! and `completed`. An entry moves through them in a strict cycle,
//!
//! ```text
//!   free -> ready -> (in flight, tracked by the ring) -> completed
//!     ^                                                      |
//!     '----------------- released by worker <----------------'
//! ```
//!
//! and is present in at most one list at a time: every transition pops from
//! one list before pushing onto the next.
//!
//! Lists are circular and doubly linked through the entries' index links
//! (tail's `next` is the head, head's `prev` is the tail), giving O(1) push
//! at the tail and pop at the head. Each list is guarded by its own
//! cross-process spinlock; critical sections are branchless and contain no
//! syscalls. The head index is additionally an atomic word so that callers
//! may peek at emptiness without taking the lock (the peek is racy and used
//! only as a hint).

use core::sync::atomic::{AtomicU32, Ordering};

use shm_arena::RawSpinLock;

use crate::entry::NIL;
use crate::layout::ArenaView;

/// One FIFO list: a spinlock and the head entry index (`NIL` when empty).
#[repr(C)]
pub(crate) struct FifoState {
    lock: RawSpinLock,
    head: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<FifoState>() == 8);

impl FifoState {
    fn init(&self) {
        self.lock.init();
        self.head.store(NIL, Ordering::Release);
    }

    /// Sets the head directly. Only valid during arena creation, before any
    /// other party can observe the list.
    pub(crate) fn set_head(&self, idx: u32) {
        self.head.store(idx, Ordering::Release);
    }

    /// Racy emptiness hint, taken without the lock.
    #[inline]
    pub(crate) fn appears_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == NIL
    }

    /// Appends entry `idx` at the tail.
    ///
    /// Link accesses below are one entry at a time (the borrows never
    /// overlap) because in short lists the tail and the head are the same
    /// slot. All touched entries belong to this list or are mid-transition
    /// under the caller's ownership, and the lock is held throughout.
    pub(crate) fn push(&self, view: &ArenaView, idx: u32) {
        let _guard = self.lock.lock();
        let head = self.head.load(Ordering::Relaxed);

        if head == NIL {
            // SAFETY: see above.
            let e = unsafe { view.entry_mut(idx) };
            e.prev = idx;
            e.next = idx;
            self.head.store(idx, Ordering::Release);
            return;
        }

        // SAFETY: see above.
        let tail = unsafe { view.entry_mut(head) }.prev;
        {
            let e = unsafe { view.entry_mut(idx) };
            e.prev = tail;
            e.next = head;
        }
        unsafe { view.entry_mut(tail) }.next = idx;
        unsafe { view.entry_mut(head) }.prev = idx;
    }

    /// Removes and returns the head entry index, or `None` when empty.
    pub(crate) fn pop(&self, view: &ArenaView) -> Option<u32> {
        let _guard = self.lock.lock();
        let head = self.head.load(Ordering::Relaxed);
        if head == NIL {
            return None;
        }

        // SAFETY: all touched entries belong to this list, the lock is
        // held, and each borrow is dropped before the next starts.
        let (next, prev) = {
            let h = unsafe { view.entry_mut(head) };
            (h.next, h.prev)
        };
        if next == head {
            self.head.store(NIL, Ordering::Release);
        } else {
            unsafe { view.entry_mut(next) }.prev = prev;
            unsafe { view.entry_mut(prev) }.next = next;
            self.head.store(next, Ordering::Release);
        }

        let h = unsafe { view.entry_mut(head) };
        h.prev = NIL;
        h.next = NIL;
        Some(head)
    }
}

/// Per-worker shared state: the three lists plus queue geometry.
#[repr(C, align(64))]
pub(crate) struct WorkerQueue {
    pub(crate) free: FifoState,
    pub(crate) ready: FifoState,
    pub(crate) completed: FifoState,
    pub(crate) capacity: u32,
    pub(crate) first_entry: u32,
}

const _: () = assert!(core::mem::size_of::<WorkerQueue>() == 64);

impl WorkerQueue {
    pub(crate) fn init(&mut self, capacity: u32, first_entry: u32) {
        self.free.init();
        self.ready.init();
        self.completed.init();
        self.capacity = capacity;
        self.first_entry = first_entry;
    }
}
