//! `fuser` bridge
//!
//! Translates the kernel's inode-based requests into [`Passthrough`] calls.
//! Open files and directory listings live in handle tables keyed by the
//! `fh` values handed to the kernel.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyLock, ReplyOpen, ReplyStatfs, ReplyWrite,
    ReplyXattr, Request, TimeOrNow,
};
use libc::c_int;
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use tracing::{debug, info, warn};

use crate::error::{FsError, Result};
use crate::inode::InodeTable;
use crate::passthrough::{Attr, DirEntry, LockRange, Passthrough};

/// How long the kernel may cache entries and attributes.
const TTL: Duration = Duration::from_secs(1);

fn file_kind(kind: std::fs::FileType) -> FileType {
    if kind.is_dir() {
        FileType::Directory
    } else if kind.is_symlink() {
        FileType::Symlink
    } else if kind.is_block_device() {
        FileType::BlockDevice
    } else if kind.is_char_device() {
        FileType::CharDevice
    } else if kind.is_fifo() {
        FileType::NamedPipe
    } else if kind.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.max(0) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

fn file_attr(ino: u64, attr: &Attr) -> FileAttr {
    let meta = &attr.metadata;
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: file_kind(meta.file_type()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn time_spec(time: TimeOrNow) -> TimeSpec {
    match time {
        TimeOrNow::Now => TimeSpec::UTIME_NOW,
        TimeOrNow::SpecificTime(at) => {
            TimeSpec::from_duration(at.duration_since(UNIX_EPOCH).unwrap_or_default())
        }
    }
}

/// Snapshot of a directory taken at `opendir`. `.` and `..` come first.
struct DirHandle {
    entries: Vec<(u64, FileType, OsString)>,
}

impl DirHandle {
    fn new(ino: u64, listing: Vec<DirEntry>) -> Self {
        let mut entries = Vec::with_capacity(listing.len() + 2);
        entries.push((ino, FileType::Directory, OsString::from(".")));
        entries.push((ino, FileType::Directory, OsString::from("..")));
        entries.extend(
            listing
                .into_iter()
                .map(|entry| (entry.ino, file_kind(entry.kind), entry.name)),
        );
        Self { entries }
    }

    /// Entries from `offset` on, each paired with the offset that resumes
    /// after it.
    fn from_offset(&self, offset: i64) -> impl Iterator<Item = (i64, &(u64, FileType, OsString))> {
        let skip = usize::try_from(offset).unwrap_or(0);
        self.entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, entry)| ((i + 1) as i64, entry))
    }
}

/// The attribute changes a `setattr` request asks for.
#[derive(Debug, Default)]
struct AttrChanges {
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: Option<TimeSpec>,
    mtime: Option<TimeSpec>,
    fh: Option<u64>,
}

/// The mounted filesystem.
pub struct PiFs {
    fs: Passthrough,
    inodes: InodeTable,
    files: HashMap<u64, File>,
    dirs: HashMap<u64, DirHandle>,
    next_fh: u64,
}

impl PiFs {
    pub fn new(fs: Passthrough) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            files: HashMap::new(),
            dirs: HashMap::new(),
            next_fh: 1,
        }
    }

    fn path_of(&self, ino: u64) -> Result<PathBuf> {
        self.inodes
            .path(ino)
            .map(Path::to_path_buf)
            .ok_or(FsError::Host(Errno::ENOENT))
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<PathBuf> {
        self.inodes
            .child(parent, name)
            .ok_or(FsError::Host(Errno::ENOENT))
    }

    fn file(&self, fh: u64) -> Result<&File> {
        self.files.get(&fh).ok_or(FsError::Host(Errno::EBADF))
    }

    fn allocate_fh(&mut self) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        fh
    }

    /// Stat `path` and register it with the kernel.
    fn entry(&mut self, path: PathBuf) -> Result<FileAttr> {
        let attr = self.fs.getattr(&path)?;
        let ino = self.inodes.lookup(path);
        Ok(file_attr(ino, &attr))
    }

    /// Apply `changes` in order mode, owner, size, times. A size change goes
    /// through the open handle when the kernel names one.
    fn set_attr(&self, ino: u64, changes: &AttrChanges) -> Result<Attr> {
        let path = self.path_of(ino)?;
        let file = changes.fh.and_then(|fh| self.files.get(&fh));
        if let Some(mode) = changes.mode {
            self.fs.chmod(&path, mode)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            self.fs.chown(&path, changes.uid, changes.gid)?;
        }
        if let Some(size) = changes.size {
            match file {
                Some(file) => self.fs.ftruncate(file, size)?,
                None => self.fs.truncate(&path, size)?,
            }
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            self.fs.utimens(&path, changes.atime, changes.mtime)?;
        }
        match file {
            Some(file) => self.fs.fgetattr(file),
            None => self.fs.getattr(&path),
        }
    }

    fn reply_entry(&mut self, result: Result<PathBuf>, reply: ReplyEntry) {
        match result.and_then(|path| self.entry(path)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn reply_empty(result: Result<()>, reply: ReplyEmpty) {
        match result {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn reply_xattr(result: Result<Vec<u8>>, size: u32, reply: ReplyXattr) {
        match result {
            Ok(value) if size == 0 => reply.size(value.len() as u32),
            Ok(value) if value.len() <= size as usize => reply.data(&value),
            Ok(_) => reply.error(libc::ERANGE),
            Err(err) => reply.error(err.errno()),
        }
    }
}

impl Filesystem for PiFs {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        if config.add_capabilities(fuser::consts::FUSE_POSIX_LOCKS).is_err() {
            warn!("kernel does not forward POSIX locks; locking stays local");
        }
        info!(root = %self.fs.root().display(), "pifs mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            open_files = self.files.len(),
            open_dirs = self.dirs.len(),
            inodes = self.inodes.len(),
            "pifs unmounted"
        );
        self.files.clear();
        self.dirs.clear();
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!(parent, ?name, "lookup");
        let path = self.child_of(parent, name);
        self.reply_entry(path, reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        debug!(ino, "getattr");
        match self.path_of(ino).and_then(|path| self.fs.getattr(&path)) {
            Ok(attr) => reply.attr(&TTL, &file_attr(ino, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino, ?mode, ?uid, ?gid, ?size, ?fh, "setattr");
        let changes = AttrChanges {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(time_spec),
            mtime: mtime.map(time_spec),
            fh,
        };
        let result = self.set_attr(ino, &changes);
        match result {
            Ok(attr) => reply.attr(&TTL, &file_attr(ino, &attr)),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        debug!(ino, "readlink");
        match self.path_of(ino).and_then(|path| self.fs.readlink(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!(parent, ?name, mode, rdev, "mknod");
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.mknod(&path, mode & !umask, u64::from(rdev))?;
            Ok(path)
        });
        self.reply_entry(result, reply);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!(parent, ?name, mode, "mkdir");
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.mkdir(&path, mode & !umask)?;
            Ok(path)
        });
        self.reply_entry(result, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent, ?name, "unlink");
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.unlink(&path)?;
            self.inodes.unlink(&path);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent, ?name, "rmdir");
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.rmdir(&path)?;
            self.inodes.unlink(&path);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!(parent, ?link_name, ?target, "symlink");
        let result = self.child_of(parent, link_name).and_then(|path| {
            self.fs.symlink(target, &path)?;
            Ok(path)
        });
        self.reply_entry(result, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(parent, ?name, newparent, ?newname, flags, "rename");
        if flags != 0 {
            // RENAME_NOREPLACE / RENAME_EXCHANGE; callers fall back to plain rename
            reply.error(libc::EINVAL);
            return;
        }
        let result = self.child_of(parent, name).and_then(|from| {
            let to = self.child_of(newparent, newname)?;
            self.fs.rename(&from, &to)?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        Self::reply_empty(result, reply);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!(ino, newparent, ?newname, "link");
        let result = self.path_of(ino).and_then(|from| {
            let to = self.child_of(newparent, newname)?;
            self.fs.link(&from, &to)?;
            Ok(to)
        });
        self.reply_entry(result, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, flags, "open");
        match self.path_of(ino).and_then(|path| self.fs.open(&path, flags)) {
            Ok(file) => {
                let fh = self.allocate_fh();
                self.files.insert(fh, file);
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino, fh, offset, size, "read");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self
            .file(fh)
            .and_then(|file| self.fs.read(file, offset as u64, size as usize))
        {
            Ok(data) => reply.data(&data),
            Err(err) => {
                if let FsError::Codec(cause) = &err {
                    warn!(ino, offset, %cause, "backing file is corrupt");
                }
                reply.error(err.errno())
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, fh, offset, len = data.len(), "write");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self
            .file(fh)
            .and_then(|file| self.fs.write(file, offset as u64, data))
        {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino, fh, "release");
        let result = match self.files.remove(&fh) {
            Some(file) => self.fs.release(file),
            None => Err(FsError::Host(Errno::EBADF)),
        };
        Self::reply_empty(result, reply);
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!(ino, fh, datasync, "fsync");
        let result = self.file(fh).and_then(|file| self.fs.fsync(file, datasync));
        Self::reply_empty(result, reply);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!(ino, "opendir");
        let listing = self.path_of(ino).and_then(|path| self.fs.read_dir(&path));
        match listing {
            Ok(listing) => {
                let fh = self.allocate_fh();
                self.dirs.insert(fh, DirHandle::new(ino, listing));
                reply.opened(fh, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, fh, offset, "readdir");
        let Some(dir) = self.dirs.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        for (next, (entry_ino, kind, name)) in dir.from_offset(offset) {
            if reply.add(*entry_ino, next, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        debug!(ino, fh, "releasedir");
        match self.dirs.remove(&fh) {
            Some(_) => reply.ok(),
            None => reply.error(libc::EBADF),
        }
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!(ino, fh, datasync, "fsyncdir");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.fsyncdir(&path, datasync));
        Self::reply_empty(result, reply);
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        debug!(ino, "statfs");
        match self.path_of(ino).and_then(|path| self.fs.statfs(&path)) {
            Ok(st) => reply.statfs(
                st.blocks() as u64,
                st.blocks_free() as u64,
                st.blocks_available() as u64,
                st.files() as u64,
                st.files_free() as u64,
                st.block_size() as u32,
                st.name_max() as u32,
                st.fragment_size() as u32,
            ),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!(ino, ?name, len = value.len(), "setxattr");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.setxattr(&path, name, value, flags));
        Self::reply_empty(result, reply);
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!(ino, ?name, size, "getxattr");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.getxattr(&path, name));
        Self::reply_xattr(result, size, reply);
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!(ino, size, "listxattr");
        let result = self.path_of(ino).and_then(|path| self.fs.listxattr(&path));
        Self::reply_xattr(result, size, reply);
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(ino, ?name, "removexattr");
        let result = self
            .path_of(ino)
            .and_then(|path| self.fs.removexattr(&path, name));
        Self::reply_empty(result, reply);
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!(ino, mask, "access");
        let result = self.path_of(ino).and_then(|path| self.fs.access(&path, mask));
        Self::reply_empty(result, reply);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(parent, ?name, mode, flags, "create");
        let result = self.child_of(parent, name).and_then(|path| {
            let file = self.fs.create(&path, mode & !umask, flags)?;
            let attr = self.fs.fgetattr(&file)?;
            Ok((path, file, attr))
        });
        match result {
            Ok((path, file, attr)) => {
                let ino = self.inodes.lookup(path);
                let fh = self.allocate_fh();
                self.files.insert(fh, file);
                reply.created(&TTL, &file_attr(ino, &attr), 0, fh, 0);
            }
            Err(err) => reply.error(err.errno()),
        }
    }

    fn getlk(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        reply: ReplyLock,
    ) {
        debug!(ino, fh, start, end, typ, "getlk");
        let probe = LockRange {
            typ,
            start,
            end,
            pid,
        };
        match self.file(fh).and_then(|file| self.fs.getlk(file, probe)) {
            Ok(lock) => reply.locked(lock.start, lock.end, lock.typ, lock.pid),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn setlk(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        start: u64,
        end: u64,
        typ: i32,
        pid: u32,
        sleep: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino, fh, start, end, typ, sleep, "setlk");
        let range = LockRange {
            typ,
            start,
            end,
            pid,
        };
        // never waits: the session serves one request at a time
        let result = self.file(fh).and_then(|file| self.fs.setlk(file, range));
        Self::reply_empty(result, reply);
    }
}
