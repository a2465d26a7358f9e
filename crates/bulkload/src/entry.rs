//! The fixed-size request slot.

use std::ffi::CStr;

/// Longest filepath a request can carry, in bytes.
pub const MAX_PATH_LEN: usize = 128;

/// Null list link: the entry is not linked into any list.
pub(crate) const NIL: u32 = u32::MAX;

/// One request/response slot.
///
/// Entries are allocated once per worker-queue-position at init, live in
/// the shared arena, and are reused for the process lifetime. At any moment
/// an entry is owned by exactly one party: the list currently containing
/// it, the kernel ring (while a read is in flight, tracked via the SQE's
/// user_data), or the worker (between `try_get` and `release`).
///
/// List links are entry indices into the arena's entry array rather than
/// pointers, so the structure does not depend on the arena landing at the
/// same virtual address in every process.
///
/// The mapped addresses `shm_ldata` / `shm_wdata` are each meaningful only
/// in the process that created the mapping (loader / worker respectively).
#[repr(C, align(64))]
pub struct Entry {
    /// Bytes to read, rounded up past the 4 KiB boundary.
    pub(crate) size: u64,
    /// Physical block address of the file's first extent; 0 if unknown.
    pub(crate) lba: u64,
    /// Loader-side mapped address of the shm object.
    pub(crate) shm_ldata: u64,
    /// Worker-side mapped address of the shm object.
    pub(crate) shm_wdata: u64,
    /// Loader-side data file descriptor; only valid while I/O is in flight.
    pub(crate) fd: i32,
    /// Loader-side shm object descriptor.
    pub(crate) shm_lfd: i32,
    /// Worker-side shm object descriptor.
    pub(crate) shm_wfd: i32,
    /// Nonzero while `shm_ldata`/`shm_lfd` hold a live loader-side mapping.
    pub(crate) shm_lmapped: u32,
    /// Index of the worker queue this entry belongs to.
    pub(crate) owner: u32,
    /// Previous entry in the containing list (circular).
    pub(crate) prev: u32,
    /// Next entry in the containing list (circular).
    pub(crate) next: u32,
    /// Requested filepath, NUL-terminated.
    pub(crate) path: [u8; MAX_PATH_LEN + 1],
    /// Derived shm object name, NUL-terminated.
    pub(crate) shm_name: [u8; MAX_PATH_LEN + 2],
}

const _: () = assert!(core::mem::size_of::<Entry>() == 320);
const _: () = assert!(core::mem::align_of::<Entry>() == 64);

impl Entry {
    /// Initializes a slot at arena-setup time.
    pub(crate) fn reset(&mut self, owner: u32) {
        self.size = 0;
        self.lba = 0;
        self.shm_ldata = 0;
        self.shm_wdata = 0;
        self.fd = -1;
        self.shm_lfd = -1;
        self.shm_wfd = -1;
        self.shm_lmapped = 0;
        self.owner = owner;
        self.prev = NIL;
        self.next = NIL;
        self.path[0] = 0;
        self.shm_name[0] = 0;
    }

    /// Stores `path`, truncated at [`MAX_PATH_LEN`] bytes, NUL-terminated.
    pub(crate) fn set_path(&mut self, path: &[u8]) {
        let n = path.len().min(MAX_PATH_LEN);
        self.path[..n].copy_from_slice(&path[..n]);
        self.path[n] = 0;
    }

    /// The stored path, without the terminating NUL.
    pub fn path_bytes(&self) -> &[u8] {
        let n = self.path.iter().position(|&b| b == 0).unwrap_or(MAX_PATH_LEN);
        &self.path[..n]
    }

    /// The stored path as a C string, for `open(2)`.
    pub(crate) fn path_cstr(&self) -> &CStr {
        CStr::from_bytes_until_nul(&self.path).expect("entry path is NUL-terminated")
    }

    /// Derives the shm object name from the stored path: a leading `'/'`
    /// followed by the path with every `'/'` replaced by `'_'`.
    pub(crate) fn derive_shm_name(&mut self) {
        self.shm_name[0] = b'/';
        for i in 0..=MAX_PATH_LEN {
            let c = self.path[i];
            self.shm_name[i + 1] = if c == b'/' { b'_' } else { c };
            if c == 0 {
                break;
            }
        }
    }

    /// The derived shm object name, for `shm_open(3)`.
    pub(crate) fn shm_name_cstr(&self) -> &CStr {
        CStr::from_bytes_until_nul(&self.shm_name).expect("shm name is NUL-terminated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Entry {
        // SAFETY: Entry is repr(C) with no niches; all-zero is a valid
        // (if meaningless) value and reset() runs before use.
        let mut e: Entry = unsafe { core::mem::zeroed() };
        e.reset(0);
        e
    }

    #[test]
    fn path_is_truncated_and_terminated() {
        let mut e = blank();
        let long = vec![b'a'; MAX_PATH_LEN + 40];
        e.set_path(&long);
        assert_eq!(e.path_bytes().len(), MAX_PATH_LEN);
        assert_eq!(e.path[MAX_PATH_LEN], 0);
    }

    #[test]
    fn max_length_path_roundtrips() {
        let mut e = blank();
        let exact = vec![b'z'; MAX_PATH_LEN];
        e.set_path(&exact);
        assert_eq!(e.path_bytes(), &exact[..]);
        assert_eq!(e.path_cstr().to_bytes(), &exact[..]);
    }

    #[test]
    fn shm_name_replaces_every_slash() {
        let mut e = blank();
        e.set_path(b"/data/set/img_001.bin");
        e.derive_shm_name();
        assert_eq!(e.shm_name_cstr().to_bytes(), b"/_data_set_img_001.bin");
    }

    #[test]
    fn shm_name_of_max_length_path() {
        let mut e = blank();
        let mut path = vec![b'/'; MAX_PATH_LEN];
        path[MAX_PATH_LEN - 1] = b'x';
        e.set_path(&path);
        e.derive_shm_name();
        let name = e.shm_name_cstr().to_bytes();
        assert_eq!(name.len(), MAX_PATH_LEN + 1);
        assert_eq!(name[0], b'/');
        assert!(name[1..MAX_PATH_LEN].iter().all(|&b| b == b'_'));
        assert_eq!(name[MAX_PATH_LEN], b'x');
    }

    #[test]
    fn relative_path_gets_leading_slash() {
        let mut e = blank();
        e.set_path(b"README");
        e.derive_shm_name();
        assert_eq!(e.shm_name_cstr().to_bytes(), b"/README");
    }
}
