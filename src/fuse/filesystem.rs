use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use log::{debug, info, warn};

use crate::consts::{InodeId, SECTOR_SIZE};
use crate::driver::file_drive::FileDrive;
use crate::ops::{Listing, SetAttr, TinyFs};
use crate::structure::inode::{Inode, InodeKind};
use crate::structure::meta::Metadata;
use crate::util::error::Error;
use crate::util::mode::{ModeBits, ModeBitsHelper};

const TTL: Duration = Duration::from_secs(1);

/// Bridges kernel requests onto a mounted [`TinyFs`] image.
pub struct FuseDriver {
    fs: TinyFs<FileDrive>,
    /// Parent of every directory the kernel has been told about, for `..` in readdir.
    parents: HashMap<u64, u64>,
}

impl FuseDriver {
    pub fn new(fs: TinyFs<FileDrive>) -> FuseDriver {
        FuseDriver { fs, parents: HashMap::new() }
    }

    fn note_parent(&mut self, parent: u64, inode: &Inode) {
        if inode.is_directory() {
            self.parents.insert(inode.id as u64, parent);
        }
    }

    fn note_children(&mut self, dir: u64, entries: &[Listing]) {
        for entry in entries.iter().filter(|entry| entry.kind == InodeKind::Directory) {
            self.parents.insert(entry.inode as u64, dir);
        }
    }

    /// The root is its own parent. A directory the kernel has not looked up yet falls back to itself.
    fn parent_of(&self, ino: u64) -> u64 {
        self.parents.get(&ino).copied().unwrap_or(ino)
    }

    fn inode_to_fileattr(&self, inode: &Inode) -> FileAttr {
        let block_size = self.fs.get_block_size();
        FileAttr {
            ino: inode.id as u64,
            size: self.fs.reported_size(inode),
            blocks: (inode.used_pointers() * block_size / SECTOR_SIZE) as u64,
            atime: inode.meta.accessed_at,
            mtime: inode.meta.modified_at,
            ctime: inode.meta.changed_at,
            crtime: inode.meta.changed_at,
            kind: file_type(inode.kind),
            perm: inode.meta.permissions,
            nlink: inode.links,
            uid: inode.meta.user_id,
            gid: inode.meta.group_id,
            rdev: 0,
            blksize: block_size as u32,
            flags: 0,
        }
    }

    fn make(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, kind: InodeKind, permissions: u16) -> Result<FileAttr, Error> {
        let meta = Metadata::new(permissions, req.uid(), req.gid());
        let inode = self.fs.make_entry(to_inode_id(parent)?, name.as_bytes(), kind, meta)?;
        self.note_parent(parent, &inode);
        Ok(self.inode_to_fileattr(&inode))
    }

    fn open_checked(&self, ino: u64, expected: InodeKind) -> Result<(), Error> {
        let inode = self.fs.get_inode(to_inode_id(ino)?)?;
        match (expected, inode.kind) {
            (InodeKind::File, InodeKind::Directory) => Err(Error::IsADirectory),
            (InodeKind::Directory, InodeKind::File) => Err(Error::NotADirectory),
            _ => Ok(()),
        }
    }
}

fn file_type(kind: InodeKind) -> FileType {
    match kind {
        InodeKind::Directory => FileType::Directory,
        InodeKind::File => FileType::RegularFile,
    }
}

fn to_inode_id(ino: u64) -> Result<InodeId, Error> {
    InodeId::try_from(ino).map_err(|_| Error::NotFound)
}

fn to_system_time(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

fn log_failure(operation: &str, ino: u64, err: &Error) -> c_int {
    match err {
        Error::NotFound => debug!("{} {}: {}", operation, ino, err),
        _ => warn!("{} {} failed: {}", operation, ino, err),
    }
    err.errno()
}

impl Filesystem for FuseDriver {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        let root = self.fs.resolve("/").map_err(|err| log_failure("init", fuser::FUSE_ROOT_ID, &err))?;
        if !root.is_directory() {
            warn!("Root inode is not a directory");
            return Err(libc::ENOTDIR);
        }
        info!("Filesystem ready, block size {}", self.fs.get_block_size());
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(err) = self.fs.close() {
            warn!("Flushing image on unmount failed: {}", err);
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let result = to_inode_id(parent).and_then(|parent| self.fs.lookup(parent, name.as_bytes()));
        match result {
            Ok(inode) => {
                self.note_parent(parent, &inode);
                reply.entry(&TTL, &self.inode_to_fileattr(&inode), 0)
            }
            Err(err) => reply.error(log_failure("lookup", parent, &err)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match to_inode_id(ino).and_then(|id| self.fs.get_inode(id)) {
            Ok(inode) => reply.attr(&TTL, &self.inode_to_fileattr(&inode)),
            Err(err) => reply.error(log_failure("getattr", ino, &err)),
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
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if let Some(size) = size {
            debug!("Ignoring resize of {} to {}", ino, size);
        }
        let attr = SetAttr {
            permissions: mode.map(|mode| mode.get_permissions(0)),
            user_id: uid,
            group_id: gid,
            accessed_at: atime.map(to_system_time),
            modified_at: mtime.map(to_system_time),
        };
        match to_inode_id(ino).and_then(|id| self.fs.set_attr(id, attr)) {
            Ok(inode) => reply.attr(&TTL, &self.inode_to_fileattr(&inode)),
            Err(err) => reply.error(log_failure("setattr", ino, &err)),
        }
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: ModeBits, umask: u32, reply: ReplyEntry) {
        match self.make(req, parent, name, InodeKind::Directory, mode.get_permissions(umask)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(log_failure("mkdir", parent, &err)),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: ModeBits,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if mode.kind_or(InodeKind::File) != InodeKind::File {
            reply.error(libc::EINVAL);
            return;
        }
        match self.make(req, parent, name, InodeKind::File, mode.get_permissions(umask)) {
            Ok(attr) => reply.created(&TTL, &attr, 0, 0, 0),
            Err(err) => reply.error(log_failure("create", parent, &err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match to_inode_id(parent).and_then(|parent| self.fs.unlink(parent, name.as_bytes())) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(log_failure("unlink", parent, &err)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match to_inode_id(parent).and_then(|parent| self.fs.rmdir(parent, name.as_bytes())) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(log_failure("rmdir", parent, &err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.open_checked(ino, InodeKind::File) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(log_failure("open", ino, &err)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.open_checked(ino, InodeKind::Directory) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(log_failure("opendir", ino, &err)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match to_inode_id(ino).and_then(|id| self.fs.read_to_extent(id, offset as u64, size as usize)) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(log_failure("read", ino, &err)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match to_inode_id(ino).and_then(|id| self.fs.write(id, offset as u64, data)) {
            Ok(written) => reply.written(written as u32),
            Err(err) => reply.error(log_failure("write", ino, &err)),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let entries = match to_inode_id(ino).and_then(|id| self.fs.list_entries(id)) {
            Ok(entries) => entries,
            Err(err) => {
                reply.error(log_failure("readdir", ino, &err));
                return;
            }
        };

        self.note_children(ino, &entries);

        let dots = [
            (ino, FileType::Directory, OsStr::new(".")),
            (self.parent_of(ino), FileType::Directory, OsStr::new("..")),
        ];
        let listed = entries
            .iter()
            .map(|entry| (entry.inode as u64, file_type(entry.kind), OsStr::from_bytes(&entry.name)));

        for (index, (child, kind, name)) in dots.into_iter().chain(listed).enumerate().skip(offset.max(0) as usize) {
            if reply.add(child, index as i64 + 1, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        match self.fs.statfs() {
            Ok(stats) => reply.statfs(
                stats.total_blocks,
                stats.free_blocks,
                stats.free_blocks,
                stats.total_inodes,
                stats.free_inodes,
                stats.block_size as u32,
                stats.name_length as u32,
                stats.block_size as u32,
            ),
            Err(err) => reply.error(log_failure("statfs", ino, &err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use fuser::FileType;

    use super::{file_type, to_inode_id, FuseDriver};
    use crate::consts::ROOT_INODE;
    use crate::structure::inode::InodeKind;
    use crate::structure::meta::Metadata;
    use crate::testing::scratch_fs;
    use crate::util::error::Error;

    #[test]
    fn attributes_follow_inode() {
        let (_dir, fs) = scratch_fs(16);
        let file = fs.make_entry(ROOT_INODE, b"f", InodeKind::File, Metadata::new(0o640, 7, 8)).unwrap();
        fs.write(file.id, 4096 + 10, b"tail").unwrap();
        let file = fs.get_inode(file.id).unwrap();

        let driver = FuseDriver::new(fs);
        let attr = driver.inode_to_fileattr(&file);
        assert_eq!(attr.ino, file.id as u64);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 2 * 4096);
        assert_eq!(attr.blocks, 8);
        assert_eq!((attr.perm, attr.uid, attr.gid, attr.nlink), (0o640, 7, 8, 1));
        assert_eq!(attr.blksize, 4096);
    }

    #[test]
    fn root_attributes() {
        let (_dir, fs) = scratch_fs(16);
        let root = fs.get_inode(ROOT_INODE).unwrap();
        let driver = FuseDriver::new(fs);
        let attr = driver.inode_to_fileattr(&root);
        assert_eq!(attr.ino, fuser::FUSE_ROOT_ID);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn open_checks_kind() {
        let (_dir, fs) = scratch_fs(16);
        let file = fs.make_entry(ROOT_INODE, b"f", InodeKind::File, Metadata::default()).unwrap();
        let driver = FuseDriver::new(fs);
        assert!(driver.open_checked(file.id as u64, InodeKind::File).is_ok());
        assert!(matches!(driver.open_checked(file.id as u64, InodeKind::Directory), Err(Error::NotADirectory)));
        assert!(matches!(driver.open_checked(ROOT_INODE as u64, InodeKind::File), Err(Error::IsADirectory)));
    }

    #[test]
    fn parents_follow_listings() {
        let (_dir, fs) = scratch_fs(16);
        let docs = fs.make_entry(ROOT_INODE, b"docs", InodeKind::Directory, Metadata::default()).unwrap();
        let inner = fs.make_entry(docs.id, b"inner", InodeKind::Directory, Metadata::default()).unwrap();
        let file = fs.make_entry(docs.id, b"notes", InodeKind::File, Metadata::default()).unwrap();
        let root_listing = fs.list_entries(ROOT_INODE).unwrap();
        let docs_listing = fs.list_entries(docs.id).unwrap();

        let mut driver = FuseDriver::new(fs);
        assert_eq!(driver.parent_of(fuser::FUSE_ROOT_ID), fuser::FUSE_ROOT_ID);
        assert_eq!(driver.parent_of(inner.id as u64), inner.id as u64);

        driver.note_children(ROOT_INODE as u64, &root_listing);
        driver.note_children(docs.id as u64, &docs_listing);
        assert_eq!(driver.parent_of(docs.id as u64), ROOT_INODE as u64);
        assert_eq!(driver.parent_of(inner.id as u64), docs.id as u64);
        assert!(!driver.parents.contains_key(&(file.id as u64)));
    }

    #[test]
    fn conversions() {
        assert_eq!(file_type(InodeKind::Directory), FileType::Directory);
        assert!(matches!(to_inode_id(u64::MAX), Err(Error::NotFound)));
        assert_eq!(to_inode_id(3).unwrap(), 3);
    }
}
