//! Path-level passthrough onto the root directory
//!
//! Every path is taken relative to the mount (a leading `/` is accepted) and
//! rebased under the root directory. Only content crosses the codec:
//!
//! ```text
//!   read / write        offsets ×2, bytes through PiCodec
//!   truncate            length ×2
//!   getattr / fgetattr  regular file size and blocks ÷2
//!   everything else     forwarded as is
//! ```

use std::ffi::{OsStr, OsString};
use std::fs::{self, DirBuilder, File, FileType, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, FileExt, MetadataExt, PermissionsExt};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::stat::{mknod, utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::{statvfs, Statvfs};
use nix::sys::time::TimeSpec;
use nix::unistd::{AccessFlags, Gid, Uid};
use pifs_core::{logical_size, physical_offset, PiCodec};
use tracing::trace;

use crate::error::Result;
use crate::xattr;

/// Host metadata with the size the user should see.
#[derive(Debug, Clone)]
pub struct Attr {
    pub metadata: Metadata,
    /// Logical size: halved for regular files, host size otherwise
    pub size: u64,
    /// 512-byte blocks, scaled like `size` so `du` agrees with `st_size`
    pub blocks: u64,
}

impl Attr {
    pub fn from_host(metadata: Metadata) -> Self {
        let (size, blocks) = if metadata.file_type().is_file() {
            (logical_size(metadata.len()), metadata.blocks().div_ceil(2))
        } else {
            (metadata.len(), metadata.blocks())
        };
        Self {
            metadata,
            size,
            blocks,
        }
    }
}

/// One directory entry as listed on the host.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileType,
    pub ino: u64,
}

/// A byte-range lock in `fcntl` terms. `end` is inclusive; `u64::MAX` means
/// "to end of file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRange {
    pub typ: i32,
    pub start: u64,
    pub end: u64,
    pub pid: u32,
}

impl LockRange {
    fn to_flock(self) -> libc::flock {
        let len = if self.end == u64::MAX {
            0
        } else {
            (self.end - self.start + 1) as libc::off_t
        };
        libc::flock {
            l_type: self.typ as libc::c_short,
            l_whence: libc::SEEK_SET as libc::c_short,
            l_start: self.start as libc::off_t,
            l_len: len,
            l_pid: 0,
        }
    }

    fn from_flock(lock: &libc::flock) -> Self {
        let start = lock.l_start as u64;
        let end = if lock.l_len == 0 {
            u64::MAX
        } else {
            start + lock.l_len as u64 - 1
        };
        Self {
            typ: i32::from(lock.l_type),
            start,
            end,
            pid: lock.l_pid.max(0) as u32,
        }
    }
}

/// Passthrough filesystem rooted at a host directory.
#[derive(Debug, Clone)]
pub struct Passthrough {
    root: PathBuf,
    codec: Arc<PiCodec>,
}

impl Passthrough {
    pub fn new(root: impl Into<PathBuf>, codec: Arc<PiCodec>) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a mount-relative path.
    pub fn full_path(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        if relative.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    // ---- attributes ----

    /// `lstat`, with regular file sizes halved.
    pub fn getattr(&self, path: &Path) -> Result<Attr> {
        Ok(Attr::from_host(fs::symlink_metadata(self.full_path(path))?))
    }

    pub fn fgetattr(&self, file: &File) -> Result<Attr> {
        Ok(Attr::from_host(file.metadata()?))
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(self.full_path(path), Permissions::from_mode(mode))?;
        Ok(())
    }

    pub fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        nix::unistd::chown(
            &self.full_path(path),
            uid.map(Uid::from_raw),
            gid.map(Gid::from_raw),
        )?;
        Ok(())
    }

    /// Set access and modification times; `None` leaves a time untouched.
    pub fn utimens(&self, path: &Path, atime: Option<TimeSpec>, mtime: Option<TimeSpec>) -> Result<()> {
        utimensat(
            None,
            &self.full_path(path),
            &atime.unwrap_or(TimeSpec::UTIME_OMIT),
            &mtime.unwrap_or(TimeSpec::UTIME_OMIT),
            UtimensatFlags::NoFollowSymlink,
        )?;
        Ok(())
    }

    /// Truncate to `length` logical bytes.
    pub fn truncate(&self, path: &Path, length: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(self.full_path(path))?;
        self.ftruncate(&file, length)
    }

    pub fn ftruncate(&self, file: &File, length: u64) -> Result<()> {
        file.set_len(physical_offset(length))?;
        Ok(())
    }

    pub fn access(&self, path: &Path, mask: i32) -> Result<()> {
        nix::unistd::access(&self.full_path(path), AccessFlags::from_bits_truncate(mask))?;
        Ok(())
    }

    pub fn statfs(&self, path: &Path) -> Result<Statvfs> {
        Ok(statvfs(&self.full_path(path))?)
    }

    // ---- namespace ----

    pub fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::read_link(self.full_path(path))?)
    }

    /// `mode` carries the file type bits as well as the permissions.
    pub fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
        mknod(
            &self.full_path(path),
            SFlag::from_bits_truncate(mode & libc::S_IFMT),
            Mode::from_bits_truncate(mode & 0o7777),
            rdev as libc::dev_t,
        )?;
        Ok(())
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        DirBuilder::new().mode(mode).create(self.full_path(path))?;
        Ok(())
    }

    pub fn unlink(&self, path: &Path) -> Result<()> {
        fs::remove_file(self.full_path(path))?;
        Ok(())
    }

    pub fn rmdir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(self.full_path(path))?;
        Ok(())
    }

    /// Create `link` pointing at `target`. The target is stored verbatim.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        std::os::unix::fs::symlink(target, self.full_path(link))?;
        Ok(())
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.full_path(from), self.full_path(to))?;
        Ok(())
    }

    pub fn link(&self, from: &Path, to: &Path) -> Result<()> {
        fs::hard_link(self.full_path(from), self.full_path(to))?;
        Ok(())
    }

    pub fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.full_path(path))? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                kind: entry.file_type()?,
                ino: entry.ino(),
            });
        }
        Ok(entries)
    }

    /// Flush a directory's metadata.
    pub fn fsyncdir(&self, path: &Path, datasync: bool) -> Result<()> {
        let dir = File::open(self.full_path(path))?;
        self.fsync(&dir, datasync)
    }

    // ---- content ----

    /// Open with `open(2)` flags.
    pub fn open(&self, path: &Path, flags: i32) -> Result<File> {
        self.open_raw(path, OFlag::from_bits_truncate(flags), Mode::empty())
    }

    /// Create and open; any access mode is allowed, `O_RDONLY` included.
    pub fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<File> {
        self.open_raw(
            path,
            OFlag::from_bits_truncate(flags) | OFlag::O_CREAT,
            Mode::from_bits_truncate(mode),
        )
    }

    fn open_raw(&self, path: &Path, flags: OFlag, mode: Mode) -> Result<File> {
        let fd = nix::fcntl::open(&self.full_path(path), flags | OFlag::O_CLOEXEC, mode)?;
        // SAFETY: open just returned fd and nothing else owns it.
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    /// Close a handle, reporting what `close(2)` says.
    pub fn release(&self, file: File) -> Result<()> {
        nix::unistd::close(file.into_raw_fd())?;
        Ok(())
    }

    /// Read up to `count` logical bytes at logical `offset`. Fewer come back
    /// at end of file; a trailing half index counts as end of file.
    pub fn read(&self, file: &File, offset: u64, count: usize) -> Result<Vec<u8>> {
        let base = physical_offset(offset);
        let mut raw = vec![0u8; count * 2];
        let mut filled = 0;
        while filled < raw.len() {
            match file.read_at(&mut raw[filled..], base + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        if filled % 2 == 1 {
            trace!(offset, "backing file ends in a half index");
        }
        raw.truncate(filled);
        Ok(self.codec.decode(&raw)?)
    }

    /// Write `data` at logical `offset`, returning the logical byte count.
    pub fn write(&self, file: &File, offset: u64, data: &[u8]) -> Result<usize> {
        let raw = self.codec.encode(data);
        file.write_all_at(&raw, physical_offset(offset))?;
        Ok(data.len())
    }

    pub fn fsync(&self, file: &File, datasync: bool) -> Result<()> {
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    // ---- locks ----

    /// First lock that would block `probe`, or `probe` itself with type
    /// `F_UNLCK` when nothing does.
    pub fn getlk(&self, file: &File, probe: LockRange) -> Result<LockRange> {
        let mut lock = probe.to_flock();
        fcntl(file.as_raw_fd(), FcntlArg::F_OFD_GETLK(&mut lock))?;
        Ok(LockRange::from_flock(&lock))
    }

    /// Take or release a lock without waiting; conflicts come back as `EAGAIN`.
    pub fn setlk(&self, file: &File, range: LockRange) -> Result<()> {
        let lock = range.to_flock();
        fcntl(file.as_raw_fd(), FcntlArg::F_OFD_SETLK(&lock))?;
        Ok(())
    }

    // ---- extended attributes ----

    pub fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> Result<()> {
        xattr::set(&self.full_path(path), name, value, flags)
    }

    pub fn getxattr(&self, path: &Path, name: &OsStr) -> Result<Vec<u8>> {
        xattr::get(&self.full_path(path), name)
    }

    pub fn listxattr(&self, path: &Path) -> Result<Vec<u8>> {
        xattr::list(&self.full_path(path))
    }

    pub fn removexattr(&self, path: &Path, name: &OsStr) -> Result<()> {
        xattr::remove(&self.full_path(path), name)
    }
}
