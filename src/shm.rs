//! Anonymous shared memory regions
//!
//! A [`SharedBuffer`] is a file descriptor the compositor can map (through a
//! `wl_shm_pool`) together with a read/write mapping on our side. Views keep
//! their vertex quad and texture pixels in one buffer each.
//!
//! Growing preserves every byte below the old size. Shrinking is logical
//! only: the backing file is never truncated below its current length, so
//! anything the compositor may still be reading stays valid.

use crate::error::{Error, Result};
use log::debug;
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};

/// A memfd-backed, mapped, growable byte region
#[derive(Debug)]
pub struct SharedBuffer {
    file: File,
    map: MmapMut,
}

impl SharedBuffer {
    /// Allocate a region of `size` bytes
    pub fn create(size: usize) -> Result<Self> {
        let alloc_failed = |source: io::Error| Error::AllocFailed { size, source };

        if size == 0 {
            return Err(alloc_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared buffer size must be non-zero",
            )));
        }

        let file = create_shared_file().map_err(alloc_failed)?;
        file.set_len(size as u64).map_err(alloc_failed)?;
        let map = map_file(&file, size).map_err(alloc_failed)?;

        debug!("allocated shared buffer of {} bytes", size);
        Ok(Self { file, map })
    }

    /// Make the region at least `size` bytes long.
    ///
    /// On failure the buffer keeps its previous size and mapping.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        if size <= self.map.len() {
            return Ok(());
        }

        let resize_failed = |source: io::Error| Error::BufferResizeFailed { size, source };

        self.file.set_len(size as u64).map_err(resize_failed)?;
        // The old mapping stays valid if this fails: the file only grew
        let map = map_file(&self.file, size).map_err(resize_failed)?;
        self.map = map;

        debug!("resized shared buffer to {} bytes", size);
        Ok(())
    }

    /// Current size in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Unmap and close the region
    pub fn release(self) {
        let len = self.map.len();
        drop(self.map);
        drop(self.file);
        debug!("released shared buffer of {} bytes", len);
    }
}

impl AsFd for SharedBuffer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

fn map_file(file: &File, len: usize) -> io::Result<MmapMut> {
    // SAFETY: the file is private to this process apart from the compositor,
    // which only reads ranges we hand out explicitly.
    unsafe { MmapOptions::new().len(len).map_mut(file) }
}

#[cfg(target_os = "linux")]
fn create_shared_file() -> io::Result<File> {
    use std::ffi::CString;
    use std::os::fd::{FromRawFd, OwnedFd};

    let name = CString::new("zsurface-shm").map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let fd = unsafe {
        libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING)
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: memfd_create returned a fresh descriptor we exclusively own
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    Ok(File::from(owned))
}

#[cfg(not(target_os = "linux"))]
fn create_shared_file() -> io::Result<File> {
    use std::fs::OpenOptions;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let path = dir.join(format!(
        "zsurface-shm-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    Ok(file)
}
