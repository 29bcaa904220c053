//! File System and IPC module

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use lazy_static::lazy_static;

use crate::constants::FIRST_USER_FD;
use crate::kernel::core::traits::{FileHandle, FileSystem};

pub mod pipe;

/// Result type for file operations
pub type FileResult<T> = Result<T, FileError>;

/// File operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    NotImplemented,
    BrokenPipe,
    WouldBlock,
    InvalidInput,
    Other,
}

/// File Descriptor Trait
///
/// Represents an open file, pipe, or other resource that can be read/written.
pub trait FileDescriptor: Send + Sync {
    /// Read bytes from the file into the buffer
    /// Returns the number of bytes read
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize>;

    /// Write bytes to the file from the buffer
    /// Returns the number of bytes written
    fn write(&mut self, buf: &[u8]) -> FileResult<usize>;

    /// Close the file descriptor
    fn close(&mut self) -> FileResult<()>;

    /// Poll for readiness (optional, for non-blocking I/O)
    fn poll(&self) -> bool {
        true
    }
}

/// Per-process fd table, mapping small integer descriptors (starting at
/// [`FIRST_USER_FD`]; 0 and 1 are reserved for the console and handled
/// directly by the syscall layer) to [`FileHandle`]s on the filesystem
/// collaborator.
#[derive(Default)]
pub struct FileTable {
    next_fd: i32,
    open: BTreeMap<i32, FileHandle>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            next_fd: FIRST_USER_FD as i32,
            open: BTreeMap::new(),
        }
    }

    /// Register a newly-opened handle, returning the fd the caller sees.
    pub fn insert(&mut self, handle: FileHandle) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open.insert(fd, handle);
        fd
    }

    pub fn get(&self, fd: i32) -> Option<FileHandle> {
        self.open.get(&fd).copied()
    }

    pub fn remove(&mut self, fd: i32) -> Option<FileHandle> {
        self.open.remove(&fd)
    }

    /// Empty the table, returning every still-open handle for the caller to
    /// close on the filesystem collaborator.
    pub fn drain(&mut self) -> Vec<FileHandle> {
        core::mem::take(&mut self.open).into_values().collect()
    }
}

struct OpenFile {
    name: String,
    pos: u32,
}

/// In-memory stand-in for the byte-level filesystem collaborator.
///
/// This kernel never shipped a real on-disk filesystem; `MemFileSystem`
/// plays the same role `RamBlockDevice` plays for the swap store, so the
/// loader and file syscalls can be exercised without hardware.
pub struct MemFileSystem {
    files: BTreeMap<String, Vec<u8>>,
    deny_write: BTreeMap<String, u32>,
    handles: BTreeMap<u64, OpenFile>,
    next_handle: u64,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            deny_write: BTreeMap::new(),
            handles: BTreeMap::new(),
            next_handle: 1,
        }
    }

    /// Preload a file, e.g. the embedded shell binary at boot.
    pub fn seed(&mut self, name: &str, data: Vec<u8>) {
        self.files.insert(name.to_string(), data);
    }

    fn handle_name(&self, handle: FileHandle) -> Option<&str> {
        self.handles.get(&handle.0).map(|o| o.name.as_str())
    }
}

impl Default for MemFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFileSystem {
    fn open(&mut self, name: &str) -> Option<FileHandle> {
        if !self.files.contains_key(name) {
            return None;
        }
        let id = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(id, OpenFile { name: name.to_string(), pos: 0 });
        Some(FileHandle(id))
    }

    fn close(&mut self, handle: FileHandle) {
        self.handles.remove(&handle.0);
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> usize {
        let Some(open) = self.handles.get_mut(&handle.0) else {
            return 0;
        };
        let Some(data) = self.files.get(&open.name) else {
            return 0;
        };
        let start = open.pos as usize;
        if start >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        open.pos += n as u32;
        n
    }

    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> usize {
        let Some(name) = self.handle_name(handle).map(str::to_string) else {
            return 0;
        };
        if self.deny_write.get(&name).copied().unwrap_or(0) > 0 {
            return 0;
        }
        let open = self.handles.get_mut(&handle.0).unwrap();
        let start = open.pos as usize;
        let data = self.files.entry(name).or_insert_with(Vec::new);
        if start + buf.len() > data.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        open.pos += buf.len() as u32;
        buf.len()
    }

    fn seek(&mut self, handle: FileHandle, pos: u32) {
        if let Some(open) = self.handles.get_mut(&handle.0) {
            open.pos = pos;
        }
    }

    fn tell(&self, handle: FileHandle) -> u32 {
        self.handles.get(&handle.0).map(|o| o.pos).unwrap_or(0)
    }

    fn length(&self, handle: FileHandle) -> u32 {
        self.handle_name(handle)
            .and_then(|name| self.files.get(name))
            .map(|d| d.len() as u32)
            .unwrap_or(0)
    }

    fn create(&mut self, name: &str, initial_size: u32) -> bool {
        if self.files.contains_key(name) {
            return false;
        }
        self.files.insert(name.to_string(), vec![0u8; initial_size as usize]);
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    fn deny_write(&mut self, handle: FileHandle) {
        if let Some(name) = self.handle_name(handle).map(str::to_string) {
            *self.deny_write.entry(name).or_insert(0) += 1;
        }
    }

    fn allow_write(&mut self, handle: FileHandle) {
        if let Some(name) = self.handle_name(handle).map(str::to_string) {
            if let Some(count) = self.deny_write.get_mut(&name) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

/// Sentinel owner token for filesystem-lock acquisitions made outside any
/// process context (boot-time seeding, before the first process exists).
const BOOT_OWNER: u64 = u64::MAX;

fn current_owner_token() -> u64 {
    crate::kernel::process::current_pid()
        .map(|pid| pid.as_u64())
        .unwrap_or(BOOT_OWNER)
}

/// Re-entrant wrapper around [`MemFileSystem`]: the filesystem lock is
/// re-entrant for the holding thread. A syscall handler that holds
/// this lock and then page-faults on a file-backed page is, in this kernel,
/// still running on behalf of the same process; `handle_user_page_fault`
/// locking [`FILESYSTEM`] again to service that fault must nest instead of
/// deadlock.
pub struct FilesystemLock {
    owner: AtomicU64,
    depth: AtomicUsize,
    inner: UnsafeCell<MemFileSystem>,
}

// SAFETY: `owner`/`depth` serialize all access to `inner`; only the thread
// that holds the depth-1 acquisition ever dereferences it mutably, exactly
// as a non-reentrant `spin::Mutex` would guarantee for its single holder.
unsafe impl Sync for FilesystemLock {}

impl FilesystemLock {
    pub const fn new(fs: MemFileSystem) -> Self {
        Self {
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            inner: UnsafeCell::new(fs),
        }
    }

    pub fn lock(&self) -> FilesystemGuard<'_> {
        let me = current_owner_token();
        loop {
            let owner = self.owner.load(Ordering::Acquire);
            if owner == me {
                self.depth.fetch_add(1, Ordering::Relaxed);
                return FilesystemGuard { lock: self };
            }
            if owner == 0
                && self
                    .owner
                    .compare_exchange(0, me, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                self.depth.store(1, Ordering::Relaxed);
                return FilesystemGuard { lock: self };
            }
            core::hint::spin_loop();
        }
    }
}

pub struct FilesystemGuard<'a> {
    lock: &'a FilesystemLock,
}

impl Deref for FilesystemGuard<'_> {
    type Target = MemFileSystem;
    fn deref(&self) -> &MemFileSystem {
        // SAFETY: only the current depth-1 holder reaches here.
        unsafe { &*self.lock.inner.get() }
    }
}

impl DerefMut for FilesystemGuard<'_> {
    fn deref_mut(&mut self) -> &mut MemFileSystem {
        // SAFETY: only the current depth-1 holder reaches here.
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl Drop for FilesystemGuard<'_> {
    fn drop(&mut self) {
        if self.lock.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.lock.owner.store(0, Ordering::Release);
        }
    }
}

lazy_static! {
    /// Single filesystem shared by every process. Guarded in production by
    /// [`crate::sync::LockId::Filesystem`].
    pub static ref FILESYSTEM: FilesystemLock = FilesystemLock::new(MemFileSystem::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_extends_file_and_read_sees_it() {
        let mut fs = MemFileSystem::new();
        fs.create("a.txt", 0);
        let h = fs.open("a.txt").unwrap();
        assert_eq!(fs.write(h, b"hello"), 5);
        fs.seek(h, 0);
        let mut buf = [0u8; 5];
        assert_eq!(fs.read(h, &mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn deny_write_blocks_writes_until_allowed() {
        let mut fs = MemFileSystem::new();
        fs.create("bin", 4);
        let h = fs.open("bin").unwrap();
        fs.deny_write(h);
        assert_eq!(fs.write(h, b"xx"), 0);
        fs.allow_write(h);
        assert_eq!(fs.write(h, b"xx"), 2);
    }

    #[test]
    fn filesystem_lock_nests_for_same_owner() {
        let lock = FilesystemLock::new(MemFileSystem::new());
        let outer = lock.lock();
        // No process is current in a unit test, so both acquisitions use the
        // boot-owner sentinel and must nest rather than spin forever.
        let inner = lock.lock();
        drop(inner);
        drop(outer);
        assert_eq!(lock.depth.load(Ordering::Relaxed), 0);
        assert_eq!(lock.owner.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn file_table_allocates_from_first_user_fd() {
        let mut table = FileTable::new();
        let fd = table.insert(FileHandle(1));
        assert_eq!(fd, FIRST_USER_FD as i32);
        assert_eq!(table.get(fd), Some(FileHandle(1)));
        assert_eq!(table.remove(fd), Some(FileHandle(1)));
        assert!(table.get(fd).is_none());
    }
}
