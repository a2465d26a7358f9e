//! Per-request shared-memory object lifecycle.
//!
//! Each in-flight request gets its own named POSIX shm object, sized to the
//! rounded read length. The loader creates, truncates and maps it before
//! submitting the read; the worker opens and maps it when the completion is
//! served, and unlinks it on release. The two sides' mappings have
//! asymmetric lifetimes: the loader may keep a slot's mapping alive across
//! requests and discard it lazily at the start of the slot's next I/O,
//! while the worker's mapping lives exactly from `try_get` to `release`.
//!
//! Names are derived from the request path, so a stale object can survive a
//! crash that skipped `release`; creating with `O_CREAT` (no `O_EXCL`)
//! tolerates that, and the truncate resizes it.

use std::io;

use tracing::debug;

use crate::entry::Entry;

/// Creates (or reopens) the entry's shm object, sizes it to `entry.size`,
/// and maps it writable on the loader side. On failure every step already
/// taken is undone, including unlinking a freshly created object.
pub(crate) fn loader_setup(entry: &mut Entry) -> io::Result<()> {
    let name = entry.shm_name_cstr();

    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_CREAT | libc::O_RDWR,
            (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::ftruncate(fd, entry.size as libc::off_t) } < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::shm_unlink(name.as_ptr());
            libc::close(fd);
        }
        return Err(err);
    }

    let data = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            entry.size as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if data == libc::MAP_FAILED {
        let err = io::Error::last_os_error();
        unsafe {
            libc::shm_unlink(name.as_ptr());
            libc::close(fd);
        }
        return Err(err);
    }

    entry.shm_lfd = fd;
    entry.shm_ldata = data as u64;
    entry.shm_lmapped = 1;
    Ok(())
}

/// Drops the loader-side mapping left on a slot by a previous request.
/// No-op when the slot holds none.
pub(crate) fn loader_discard(entry: &mut Entry) {
    if entry.shm_lmapped == 0 {
        return;
    }
    debug!(
        path = %String::from_utf8_lossy(entry.path_bytes()),
        size = entry.size,
        "discarding stale loader-side mapping"
    );
    unsafe {
        libc::munmap(entry.shm_ldata as *mut libc::c_void, entry.size as usize);
        libc::close(entry.shm_lfd);
    }
    entry.shm_ldata = 0;
    entry.shm_lfd = -1;
    entry.shm_lmapped = 0;
}

/// Opens and maps the entry's shm object on the worker side. Called by
/// `try_get` after a completion has been popped.
pub(crate) fn worker_open(entry: &mut Entry) -> io::Result<()> {
    let name = entry.shm_name_cstr();

    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR,
            (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let data = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            entry.size as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if data == libc::MAP_FAILED {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    entry.shm_wfd = fd;
    entry.shm_wdata = data as u64;
    Ok(())
}

/// Unlinks the shm object and tears down the worker-side mapping. The
/// loader-side mapping, if any, stays for lazy discard.
pub(crate) fn worker_release(entry: &mut Entry) {
    unsafe {
        libc::shm_unlink(entry.shm_name_cstr().as_ptr());
        libc::close(entry.shm_wfd);
        libc::munmap(entry.shm_wdata as *mut libc::c_void, entry.size as usize);
    }
    entry.shm_wfd = -1;
    entry.shm_wdata = 0;
}

/// Unlinks the shm object by name without touching any mapping. Used when
/// serving a completion fails partway and the object must not leak.
pub(crate) fn unlink(entry: &Entry) {
    unsafe {
        libc::shm_unlink(entry.shm_name_cstr().as_ptr());
    }
}
