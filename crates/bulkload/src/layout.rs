//! Shared arena layout.
//!
//! One anonymous [`SharedArena`] holds everything the loader and its worker
//! processes share:
//!
//! ```text
//!   LO                                                HI
//!   ┌──────────────────────┬────────────────────────┐
//!   │ WorkerQueue structs  │ Entry structs          │
//!   │ n_workers * 64 bytes │ n_workers * depth * 320│
//!   └──────────────────────┴────────────────────────┘
//! ```
//!
//! Workers fork from the loader after the arena is mapped, so all parties
//! see the same pages; structures inside still refer to each other by index
//! so nothing depends on the mapping address. The fork is also why the
//! arena needs no self-describing header: no process ever maps it blind,
//! every view descends from the one built at creation.

use std::mem::size_of;

use shm_arena::{Region, SharedArena};

use crate::entry::Entry;
use crate::error::LoaderError;
use crate::queue::WorkerQueue;

/// Computed byte offsets of the arena's sub-structures.
pub(crate) struct ArenaLayout {
    pub(crate) queues_offset: usize,
    pub(crate) entries_offset: usize,
    pub(crate) total_size: usize,
}

impl ArenaLayout {
    pub(crate) fn compute(n_workers: usize, queue_depth: usize) -> Self {
        let queues_offset = 0;
        let entries_offset = queues_offset + n_workers * size_of::<WorkerQueue>();
        let total_size = entries_offset + n_workers * queue_depth * size_of::<Entry>();
        Self {
            queues_offset,
            entries_offset,
            total_size,
        }
    }
}

/// A process-local view of an initialized arena.
///
/// Carries the region and the layout offsets; all addressing goes through
/// [`Region::array_ptr`], so copies of the view are equally valid in every
/// process inheriting the mapping. Cheap to copy; valid for as long as the
/// arena mapping is alive in this process.
#[derive(Clone, Copy)]
pub(crate) struct ArenaView {
    region: Region,
    queues_offset: usize,
    entries_offset: usize,
    n_workers: usize,
    queue_depth: usize,
}

// SAFETY: the view addresses a shared mapping; concurrent access to the
// pointed-to structures is synchronized by their spinlocks and by the
// entry ownership cycle.
unsafe impl Send for ArenaView {}
unsafe impl Sync for ArenaView {}

impl ArenaView {
    /// Initializes a freshly allocated arena and returns a view of it.
    ///
    /// Writes the worker queues and the entries; links every entry into
    /// its owner's free list.
    pub(crate) fn create(
        arena: &SharedArena,
        n_workers: usize,
        queue_depth: usize,
    ) -> Result<Self, LoaderError> {
        let layout = ArenaLayout::compute(n_workers, queue_depth);
        if arena.len() < layout.total_size {
            return Err(LoaderError::InvalidConfig("arena smaller than layout"));
        }

        let view = Self {
            region: arena.region(),
            queues_offset: layout.queues_offset,
            entries_offset: layout.entries_offset,
            n_workers,
            queue_depth,
        };

        for w in 0..n_workers {
            let first = (w * queue_depth) as u32;
            // SAFETY: the arena was just allocated and is exclusively
            // owned until this function returns.
            let queue = unsafe { &mut *view.region.array_ptr::<WorkerQueue>(view.queues_offset, w) };
            queue.init(queue_depth as u32, first);

            for j in 0..queue_depth {
                let idx = first + j as u32;
                // SAFETY: as above.
                let e = unsafe { view.entry_mut(idx) };
                e.reset(w as u32);
                // Pre-link the whole queue as a circular free list.
                e.next = first + ((j + 1) % queue_depth) as u32;
                e.prev = first + ((j + queue_depth - 1) % queue_depth) as u32;
            }
            queue.free.set_head(first);
        }

        Ok(view)
    }

    #[inline]
    pub(crate) fn n_workers(&self) -> usize {
        self.n_workers
    }

    #[inline]
    pub(crate) fn n_entries(&self) -> usize {
        self.n_workers * self.queue_depth
    }

    /// The queue for worker `id`. Panics on an out-of-range id.
    #[inline]
    pub(crate) fn queue(&self, id: usize) -> &WorkerQueue {
        assert!(id < self.n_workers, "worker id {id} out of range");
        // SAFETY: in range; WorkerQueue's interior mutability is behind
        // atomics and spinlocks.
        unsafe { &*self.region.array_ptr::<WorkerQueue>(self.queues_offset, id) }
    }

    /// Mutable access to entry `idx`.
    ///
    /// The entry ownership cycle makes this sound: callers only take a
    /// mutable reference to an entry they currently own (popped from a
    /// list, named by a completion, or held by the worker), or to an
    /// entry's links while holding the containing list's lock.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn entry_mut(&self, idx: u32) -> &mut Entry {
        debug_assert!((idx as usize) < self.n_entries());
        unsafe { &mut *self.region.array_ptr::<Entry>(self.entries_offset, idx as usize) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_dense_and_ordered() {
        let layout = ArenaLayout::compute(2, 4);
        assert_eq!(layout.queues_offset, 0);
        assert_eq!(layout.entries_offset, 2 * 64);
        assert_eq!(layout.total_size, layout.entries_offset + 8 * 320);
    }

    #[test]
    fn create_rejects_short_arena() {
        let arena = SharedArena::alloc_zeroed(4096).unwrap();
        // 64 entries of 320 bytes cannot fit a single page.
        assert!(matches!(
            ArenaView::create(&arena, 1, 64),
            Err(LoaderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn all_entries_start_free() {
        let layout = ArenaLayout::compute(1, 4);
        let arena = SharedArena::alloc_zeroed(layout.total_size).unwrap();
        let view = ArenaView::create(&arena, 1, 4).unwrap();
        let queue = view.queue(0);

        for expect in 0..4u32 {
            assert_eq!(queue.free.pop(&view), Some(expect));
        }
        assert_eq!(queue.free.pop(&view), None);
        assert!(queue.ready.appears_empty());
        assert!(queue.completed.appears_empty());
    }

    #[test]
    fn view_copies_address_the_same_arena() {
        let layout = ArenaLayout::compute(2, 2);
        let arena = SharedArena::alloc_zeroed(layout.total_size).unwrap();
        let view = ArenaView::create(&arena, 2, 2).unwrap();
        let copy = view;

        assert_eq!(view.queue(1).free.pop(&view), Some(2));
        // The copy observes the pop made through the original view.
        assert_eq!(copy.queue(1).free.pop(&copy), Some(3));
        assert_eq!(view.queue(1).free.pop(&copy), None);
    }
}
