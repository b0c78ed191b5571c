//! Thin memory-mapped file wrappers.
//!
//! Shared-memory segments are always owned by the producer: it creates them
//! with [`MmapFileMut::create_rw`], sizes them, and eventually unlinks the
//! backing file. Consumers attach with [`MmapFileMut::open_rw`] (control
//! segments, which they may CAS into) or [`MmapFile::open_ro`] (data
//! segments, which they only ever read).

use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// A writable memory-mapped file. Used for segments this process creates
/// (producer) or for control segments it needs to CAS into (consumer).
pub struct MmapFileMut {
    _file: File,
    mmap: MmapMut,
}

/// A read-only memory-mapped file. Used for data segments on the consumer
/// side, which never write into the payload storage.
pub struct MmapFile {
    _file: File,
    mmap: Mmap,
}

impl MmapFileMut {
    /// Creates a new backing file of exactly `size_bytes`, mapped read-write.
    ///
    /// `mode` is the Unix file mode to apply (e.g. `0o600` for owner-only,
    /// `0o666` for world-writable QM control segments). Ignored on non-Unix.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64, mode: u32) -> io::Result<Self> {
        let mut opts = OpenOptions::new();
        opts.create(true).read(true).write(true).truncate(true);
        #[cfg(unix)]
        opts.mode(mode);
        let file = opts.open(&path)?;
        file.set_len(size_bytes)?;

        #[cfg(unix)]
        {
            let perm = std::fs::Permissions::from_mode(mode);
            file.set_permissions(perm)?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    /// Opens an existing file and maps it read-write. Used by a consumer
    /// that needs to CAS slot state words or write its own transaction log
    /// inside a control segment.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl MmapFile {
    /// Opens an existing file and maps it read-only. Used for data segments
    /// on the consumer side: readers never write into sample storage.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn mmap_roundtrip_bytes() {
        let path = format!("/tmp/lola_shm_test_{}", std::process::id());
        let size = 4096;
        {
            let mut mm = MmapFileMut::create_rw(&path, size, 0o600).unwrap();
            unsafe {
                let p = mm.as_mut_ptr();
                *p.add(0) = 0xAB;
                *p.add(1) = 0xCD;
            }
        }
        {
            let mm = MmapFile::open_ro(&path).unwrap();
            unsafe {
                let p = mm.as_ptr();
                assert_eq!(*p.add(0), 0xAB);
                assert_eq!(*p.add(1), 0xCD);
            }
        }
        let _ = fs::remove_file(&path);
    }

    #[cfg(unix)]
    #[test]
    fn create_rw_applies_requested_mode() {
        use std::os::unix::fs::PermissionsExt;
        let path = format!("/tmp/lola_shm_mode_test_{}", std::process::id());
        {
            let _mm = MmapFileMut::create_rw(&path, 64, 0o600).unwrap();
        }
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        let _ = fs::remove_file(&path);
    }
}
