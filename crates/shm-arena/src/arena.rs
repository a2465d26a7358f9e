//! Anonymous shared memory arenas.

use std::io;

use crate::region::Region;

/// An anonymous `MAP_SHARED` memory mapping.
///
/// The arena is allocated by one process and inherited by every child
/// forked afterwards; parent and children then see the same physical pages
/// at the same virtual address. This is the backing store for all
/// cross-process structures: the creating process allocates once at startup
/// and the mapping lives until that process tears down.
pub struct SharedArena {
    ptr: *mut u8,
    len: usize,
}

impl SharedArena {
    /// Allocates a zero-filled shared mapping of at least `len` bytes.
    ///
    /// The length is rounded up to the page size. Returns the OS error if
    /// the mapping cannot be established.
    pub fn alloc_zeroed(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "arena length must be > 0",
            ));
        }

        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = len.div_ceil(page) * page;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    /// Offset-addressed view over the whole arena.
    #[inline]
    pub fn region(&self) -> Region {
        // SAFETY: the mapping is valid for `len` bytes for the lifetime of
        // this arena, and page alignment satisfies any contained type.
        unsafe { Region::from_raw(self.ptr, self.len) }
    }

    /// Mapped length in bytes (page-rounded).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the arena covers zero bytes. Never true for a live arena.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedArena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

// SAFETY: the mapping stays valid until drop; concurrent access is governed
// by the structures placed inside it.
unsafe impl Send for SharedArena {}
unsafe impl Sync for SharedArena {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_page_rounded() {
        let arena = SharedArena::alloc_zeroed(100).unwrap();
        assert!(arena.len() >= 4096);
        assert_eq!(arena.len() % 4096, 0);

        let region = arena.region();
        for off in [0usize, 50, arena.len() - 1] {
            assert_eq!(unsafe { *region.offset(off) }, 0);
        }
    }

    #[test]
    fn zero_length_rejected() {
        assert!(SharedArena::alloc_zeroed(0).is_err());
    }

    #[test]
    fn writes_visible_through_region() {
        let arena = SharedArena::alloc_zeroed(4096).unwrap();
        unsafe { *arena.region().offset(123) = 0xab };
        assert_eq!(unsafe { *arena.region().offset(123) }, 0xab);
    }

    #[test]
    fn shared_with_forked_child() {
        let arena = SharedArena::alloc_zeroed(4096).unwrap();
        let region = arena.region();

        match unsafe { libc::fork() } {
            0 => {
                // Child: write a marker the parent can observe, then exit
                // without running any test-harness teardown.
                unsafe { *region.offset(0) = 42 };
                unsafe { libc::_exit(0) };
            }
            pid if pid > 0 => {
                let mut status = 0;
                unsafe { libc::waitpid(pid, &mut status, 0) };
                assert_eq!(unsafe { *region.offset(0) }, 42);
            }
            _ => panic!("fork failed: {}", io::Error::last_os_error()),
        }
    }
}
