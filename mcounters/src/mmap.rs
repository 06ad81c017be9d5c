//! Memory-mapped counters files.

use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::fcntl::{open, OFlag};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::{close, ftruncate};

use crate::layout::align_up;
use crate::region::Region;

/// A counters file mapped into this process.
///
/// The mapping stays valid until [`MappedFile::unmap`] runs (explicitly, or
/// on drop); every [`Region`] view handed out becomes dangling after that.
#[derive(Debug)]
pub(crate) struct MappedFile {
    region: Region,
    fd: RawFd,
    unmapped: AtomicBool,
}

impl MappedFile {
    /// Creates a counters file of at least `size` bytes and maps it shared
    /// read/write.
    ///
    /// The file is created exclusively: an existing file fails with
    /// `AlreadyExists`, which is how a writer detects a conflicting
    /// publisher. The size is rounded up to the page size and every page is
    /// pre-touched so later stores never fault.
    pub(crate) fn create(path: &Path, size: usize) -> io::Result<MappedFile> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let page_size = page_size();
        let aligned_size = align_up(size, page_size);
        let map_len = NonZeroUsize::new(aligned_size).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "mapping size must be non-zero")
        })?;

        let owned_fd = open(
            path,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH,
        )
        .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        let borrowed_fd = unsafe { BorrowedFd::borrow_raw(owned_fd) };
        if let Err(e) = ftruncate(borrowed_fd, aligned_size as i64) {
            drop(owned_fd);
            let _ = std::fs::remove_file(path);
            return Err(io::Error::from_raw_os_error(e as i32));
        }

        let ptr = match unsafe {
            mmap(
                None,
                map_len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                borrowed_fd,
                0,
            )
        } {
            Ok(p) => p,
            Err(e) => {
                drop(owned_fd);
                let _ = std::fs::remove_file(path);
                return Err(io::Error::from_raw_os_error(e as i32));
            }
        };

        // SAFETY: mmap never returns null on success.
        let addr = unsafe { NonNull::new_unchecked(ptr.as_ptr().cast()) };
        let region = Region::new(addr, aligned_size);

        let mut position = 0;
        while position < aligned_size {
            region.put_i64(position, 0);
            position += page_size;
        }

        Ok(MappedFile {
            region,
            fd: owned_fd.into_raw_fd(),
            unmapped: AtomicBool::new(false),
        })
    }

    /// Opens an existing counters file and maps it shared read-only at its
    /// full size.
    pub(crate) fn open_read_only(path: &Path) -> io::Result<MappedFile> {
        let owned_fd = open(path, OFlag::O_RDONLY, Mode::empty())
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        let raw_fd = owned_fd.as_raw_fd();

        let mut stat_buf: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(raw_fd, &mut stat_buf) } != 0 {
            let err = io::Error::last_os_error();
            drop(owned_fd);
            return Err(err);
        }
        let len = stat_buf.st_size as usize;

        let map_len = NonZeroUsize::new(len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "counters file is empty")
        })?;

        let borrowed_fd = unsafe { BorrowedFd::borrow_raw(owned_fd) };
        let ptr = match unsafe {
            mmap(
                None,
                map_len,
                ProtFlags::PROT_READ,
                MapFlags::MAP_SHARED,
                borrowed_fd,
                0,
            )
        } {
            Ok(p) => p,
            Err(e) => {
                drop(owned_fd);
                return Err(io::Error::from_raw_os_error(e as i32));
            }
        };

        // SAFETY: mmap never returns null on success.
        let addr = unsafe { NonNull::new_unchecked(ptr.as_ptr().cast()) };

        Ok(MappedFile {
            region: Region::new(addr, len),
            fd: owned_fd.into_raw_fd(),
            unmapped: AtomicBool::new(false),
        })
    }

    pub(crate) fn region(&self) -> Region {
        self.region
    }

    /// Releases the mapping and the file descriptor. Idempotent.
    pub(crate) fn unmap(&self) -> io::Result<()> {
        if self.unmapped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // SAFETY: the address and length come from the successful mmap that
        // built this value, and the flag above makes sure it runs once.
        let unmap_result = unsafe { munmap(self.region.base().cast(), self.region.capacity()) };
        let close_result = close(self.fd);
        unmap_result.map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        close_result.map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        let _ = self.unmap();
    }
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mcounters_mmap_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn create_rounds_up_to_page_size() {
        let path = test_path("roundup");
        let mapped = MappedFile::create(&path, 100).expect("failed to create mapping");
        assert_eq!(mapped.region().capacity() % page_size(), 0);
        assert!(mapped.region().capacity() >= 100);
        drop(mapped);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn create_is_exclusive() {
        let path = test_path("exclusive");
        let mapped = MappedFile::create(&path, 4096).expect("failed to create mapping");
        let err = MappedFile::create(&path, 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        drop(mapped);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn written_data_is_visible_through_a_readonly_mapping() {
        let path = test_path("readback");
        let writer_side = MappedFile::create(&path, 4096).expect("failed to create mapping");
        writer_side.region().put_i64(64, 0x1122_3344_5566_7788);

        let reader_side = MappedFile::open_read_only(&path).expect("failed to open mapping");
        assert_eq!(reader_side.region().capacity(), writer_side.region().capacity());
        assert_eq!(reader_side.region().get_i64(64), 0x1122_3344_5566_7788);

        drop(reader_side);
        drop(writer_side);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn unmap_is_idempotent() {
        let path = test_path("idempotent");
        let mapped = MappedFile::create(&path, 4096).expect("failed to create mapping");
        mapped.unmap().expect("first unmap failed");
        mapped.unmap().expect("second unmap failed");
        drop(mapped);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn create_makes_parent_directories() {
        let dir = std::env::temp_dir().join(format!("mcounters_mmap_dirs_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("counters.dat");
        let mapped = MappedFile::create(&path, 4096).expect("failed to create mapping");
        drop(mapped);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
