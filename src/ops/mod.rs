use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use log::{debug, info};

use crate::consts::{InodeId, FILE_NAME_LENGTH, ROOT_INODE};
use crate::driver::DeviceDriver;
use crate::structure::inode::{Inode, InodeKind};
use crate::structure::meta::{GroupId, Metadata, UserId};
use crate::structure::{FormatOptions, Structure};
use crate::util::error::{Error, Result};

pub mod file;
pub mod path;

/// A directory entry joined with the kind of the inode it names.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub name: Vec<u8>,
    pub inode: InodeId,
    pub kind: InodeKind,
}

/// Attribute changes requested through `set_attr`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub permissions: Option<u16>,
    pub user_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub accessed_at: Option<SystemTime>,
    pub modified_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsStats {
    pub block_size: usize,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    pub name_length: usize,
}

/// Names that could never be reached again through path resolution are refused.
fn check_new_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name == b"." || name == b".." || name.contains(&b'/') {
        return Err(Error::InvalidName);
    }
    if name.len() > FILE_NAME_LENGTH {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// The filesystem engine. Every operation holds the one lock for its whole duration,
/// lookups included, so callers on different threads are fully serialized.
pub struct TinyFs<A: DeviceDriver> {
    structure: Mutex<Structure<A>>,
    block_size: usize,
}

impl<A: DeviceDriver> TinyFs<A> {
    pub fn format(device: A, options: &FormatOptions) -> Result<TinyFs<A>> {
        Ok(TinyFs::from_structure(Structure::format(device, options)?))
    }

    pub fn mount(device: A) -> Result<TinyFs<A>> {
        Ok(TinyFs::from_structure(Structure::mount(device)?))
    }

    fn from_structure(structure: Structure<A>) -> TinyFs<A> {
        let block_size = structure.get_block_size();
        TinyFs { structure: Mutex::new(structure), block_size }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Structure<A>>> {
        self.structure.lock().map_err(|_| Error::Poisoned)
    }

    #[inline]
    pub fn get_block_size(&self) -> usize {
        self.block_size
    }

    pub fn resolve(&self, path: &str) -> Result<Inode> {
        debug!("resolve {:?}", path);
        self.lock()?.resolve_path(path, ROOT_INODE)
    }

    pub fn lookup(&self, parent: InodeId, name: &[u8]) -> Result<Inode> {
        let structure = self.lock()?;
        let entry = structure.find_entry(parent, name)?;
        structure.read_valid_inode(entry.inode)
    }

    pub fn get_inode(&self, id: InodeId) -> Result<Inode> {
        self.lock()?.read_valid_inode(id)
    }

    pub fn list_entries(&self, dir: InodeId) -> Result<Vec<Listing>> {
        let structure = self.lock()?;
        structure
            .list_entries(dir)?
            .into_iter()
            .map(|entry| {
                let kind = structure.read_inode(entry.inode)?.kind;
                Ok(Listing { name: entry.name, inode: entry.inode, kind })
            })
            .collect()
    }

    /// Creates a file or directory named `name` in `parent` and returns its inode.
    ///
    /// The inode is allocated and written before the entry is added; if the entry cannot be
    /// added the inode is released again.
    pub fn make_entry(&self, parent: InodeId, name: &[u8], kind: InodeKind, meta: Metadata) -> Result<Inode> {
        debug!("make_entry {} {:?} {:?}", parent, String::from_utf8_lossy(name), kind);
        check_new_name(name)?;

        let mut structure = self.lock()?;
        match structure.find_entry(parent, name) {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let id = structure.allocate_inode()?;
        let mut inode = Inode::new(id, kind);
        inode.links = match kind {
            InodeKind::Directory => 2,
            InodeKind::File => 1,
        };
        inode.meta = meta;
        structure.write_inode(&inode)?;

        if let Err(err) = structure.add_entry(parent, id, name) {
            inode.valid = false;
            structure.write_inode(&inode)?;
            structure.free_inode(id)?;
            return Err(err);
        }

        let mut parent_inode = structure.read_valid_inode(parent)?;
        if kind == InodeKind::Directory {
            parent_inode.links += 1;
        }
        parent_inode.meta.touch_modified();
        structure.write_inode(&parent_inode)?;
        Ok(inode)
    }

    /// Removes `name` from `parent` and frees the inode it names, whatever its kind.
    pub fn remove_entry(&self, parent: InodeId, name: &[u8]) -> Result<()> {
        self.remove(parent, name, None)
    }

    pub fn unlink(&self, parent: InodeId, name: &[u8]) -> Result<()> {
        self.remove(parent, name, Some(InodeKind::File))
    }

    pub fn rmdir(&self, parent: InodeId, name: &[u8]) -> Result<()> {
        self.remove(parent, name, Some(InodeKind::Directory))
    }

    fn remove(&self, parent: InodeId, name: &[u8], expected: Option<InodeKind>) -> Result<()> {
        debug!("remove {} {:?}", parent, String::from_utf8_lossy(name));
        let mut structure = self.lock()?;
        let entry = structure.find_entry(parent, name)?;
        let mut child = structure.read_inode(entry.inode)?;

        match (expected, child.kind) {
            (Some(InodeKind::File), InodeKind::Directory) => return Err(Error::IsADirectory),
            (Some(InodeKind::Directory), InodeKind::File) => return Err(Error::NotADirectory),
            _ => {}
        }
        if child.valid && child.is_directory() && !structure.is_empty_directory(child.id)? {
            return Err(Error::DirectoryNotEmpty);
        }

        structure.remove_entry(parent, name)?;

        structure.release_data(&mut child)?;
        child.valid = false;
        child.links = 0;
        structure.write_inode(&child)?;
        structure.free_inode(child.id)?;

        let mut parent_inode = structure.read_valid_inode(parent)?;
        if child.is_directory() {
            parent_inode.links = parent_inode.links.saturating_sub(1);
        }
        parent_inode.meta.touch_modified();
        structure.write_inode(&parent_inode)
    }

    pub fn read(&self, id: InodeId, offset: u64, size: usize) -> Result<Vec<u8>> {
        debug!("read {} offset={} size={}", id, offset, size);
        let structure = self.lock()?;
        let inode = structure.read_valid_inode(id)?;
        if inode.is_directory() {
            return Err(Error::IsADirectory);
        }
        structure.read_data(&inode, offset, size)
    }

    /// Like `read`, but stops at the reported size instead of zero-filling past it.
    pub fn read_to_extent(&self, id: InodeId, offset: u64, size: usize) -> Result<Vec<u8>> {
        debug!("read_to_extent {} offset={} size={}", id, offset, size);
        let structure = self.lock()?;
        let inode = structure.read_valid_inode(id)?;
        if inode.is_directory() {
            return Err(Error::IsADirectory);
        }
        let end = self.reported_size(&inode);
        if offset >= end {
            return Ok(Vec::new());
        }
        let length = (end - offset).min(size as u64) as usize;
        structure.read_data(&inode, offset, length)
    }

    pub fn write(&self, id: InodeId, offset: u64, data: &[u8]) -> Result<usize> {
        debug!("write {} offset={} size={}", id, offset, data.len());
        let mut structure = self.lock()?;
        let mut inode = structure.read_valid_inode(id)?;
        if inode.is_directory() {
            return Err(Error::IsADirectory);
        }

        let written = structure.write_data(&mut inode, offset, data)?;
        inode.meta.touch_modified();
        structure.write_inode(&inode)?;
        Ok(written)
    }

    pub fn set_attr(&self, id: InodeId, attr: SetAttr) -> Result<Inode> {
        debug!("set_attr {} {:?}", id, attr);
        let mut structure = self.lock()?;
        let mut inode = structure.read_valid_inode(id)?;

        let meta = &mut inode.meta;
        if let Some(permissions) = attr.permissions {
            meta.permissions = permissions;
        }
        if let Some(user_id) = attr.user_id {
            meta.user_id = user_id;
        }
        if let Some(group_id) = attr.group_id {
            meta.group_id = group_id;
        }
        if let Some(accessed_at) = attr.accessed_at {
            meta.accessed_at = accessed_at;
        }
        if let Some(modified_at) = attr.modified_at {
            meta.modified_at = modified_at;
        }
        meta.changed_at = SystemTime::now();

        structure.write_inode(&inode)?;
        Ok(inode)
    }

    pub fn statfs(&self) -> Result<FsStats> {
        let structure = self.lock()?;
        Ok(FsStats {
            block_size: structure.get_block_size(),
            total_blocks: structure.superblock.max_blocks as u64,
            free_blocks: structure.free_block_count()?,
            total_inodes: structure.superblock.max_inodes as u64,
            free_inodes: structure.free_inode_count()?,
            name_length: FILE_NAME_LENGTH,
        })
    }

    pub fn close(&self) -> Result<()> {
        info!("Flushing image");
        self.lock()?.flush()
    }

    /// Byte length the adapter reports for `inode`: never less than the recorded size, and
    /// long enough to reach the highest allocated block of a sparse file.
    pub fn reported_size(&self, inode: &Inode) -> u64 {
        inode.size.max(inode.extent(self.block_size))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{SetAttr, TinyFs};
    use crate::consts::ROOT_INODE;
    use crate::driver::file_drive::FileDrive;
    use crate::structure::inode::InodeKind;
    use crate::structure::meta::Metadata;
    use crate::testing::{image_path, scratch_fs};
    use crate::util::error::Error;

    fn file_meta() -> Metadata {
        Metadata::new(0o644, 1000, 1000)
    }

    #[test]
    fn scenario() {
        let (_dir, fs) = scratch_fs(16);

        let root = fs.resolve("/").unwrap();
        assert_eq!(root.id, ROOT_INODE);
        assert_eq!(root.kind, InodeKind::Directory);

        let a = fs.make_entry(ROOT_INODE, b"a", InodeKind::File, file_meta()).unwrap();
        let data: Vec<u8> = (0..100).collect();
        assert_eq!(fs.write(a.id, 0, &data).unwrap(), 100);
        assert_eq!(fs.read(a.id, 0, 100).unwrap(), data);

        let sub = fs.make_entry(ROOT_INODE, b"sub", InodeKind::Directory, file_meta()).unwrap();
        assert_eq!(fs.resolve("/sub").unwrap().id, sub.id);

        fs.remove_entry(ROOT_INODE, b"a").unwrap();
        assert!(matches!(fs.resolve("/a"), Err(Error::NotFound)));
    }

    #[test]
    fn inode_exhaustion() {
        let (_dir, fs) = scratch_fs(16);
        let usable = fs.statfs().unwrap().free_inodes;
        assert_eq!(usable, 14);

        for i in 0..usable {
            fs.make_entry(ROOT_INODE, format!("f{}", i).as_bytes(), InodeKind::File, file_meta()).unwrap();
        }
        let overflow = fs.make_entry(ROOT_INODE, b"one-too-many", InodeKind::File, file_meta());
        assert!(matches!(overflow, Err(Error::Exhausted)));
        assert!(matches!(fs.lookup(ROOT_INODE, b"one-too-many"), Err(Error::NotFound)));
        assert_eq!(fs.list_entries(ROOT_INODE).unwrap().len(), usable as usize);
    }

    #[test]
    fn failed_add_releases_inode() {
        let (_dir, fs) = scratch_fs(300);
        for i in 0..256 {
            fs.make_entry(ROOT_INODE, format!("f{}", i).as_bytes(), InodeKind::File, file_meta()).unwrap();
        }
        let free_before = fs.statfs().unwrap().free_inodes;
        assert!(matches!(
            fs.make_entry(ROOT_INODE, b"full", InodeKind::File, file_meta()),
            Err(Error::NoSpace)
        ));
        assert_eq!(fs.statfs().unwrap().free_inodes, free_before);
    }

    #[test]
    fn duplicate_and_bad_parent() {
        let (_dir, fs) = scratch_fs(16);
        let file = fs.make_entry(ROOT_INODE, b"x", InodeKind::File, file_meta()).unwrap();
        assert!(matches!(
            fs.make_entry(ROOT_INODE, b"x", InodeKind::Directory, file_meta()),
            Err(Error::AlreadyExists)
        ));
        assert!(matches!(
            fs.make_entry(file.id, b"y", InodeKind::File, file_meta()),
            Err(Error::NotADirectory)
        ));
        assert!(matches!(fs.make_entry(12, b"y", InodeKind::File, file_meta()), Err(Error::NotFound)));
        assert!(matches!(fs.make_entry(ROOT_INODE, b"", InodeKind::File, file_meta()), Err(Error::InvalidName)));
    }

    #[test]
    fn unreachable_names_rejected() {
        let (_dir, fs) = scratch_fs(16);
        let free_before = fs.statfs().unwrap().free_inodes;
        let names: [&[u8]; 5] = [b"a/b", b"/", b".", b"..", b"trailing/"];
        for name in names {
            assert!(matches!(fs.make_entry(ROOT_INODE, name, InodeKind::Directory, file_meta()), Err(Error::InvalidName)));
        }
        assert!(matches!(
            fs.make_entry(ROOT_INODE, &[b'n'; 249], InodeKind::File, file_meta()),
            Err(Error::NameTooLong)
        ));
        assert!(fs.list_entries(ROOT_INODE).unwrap().is_empty());
        assert_eq!(fs.statfs().unwrap().free_inodes, free_before);

        let dotted = fs.make_entry(ROOT_INODE, b"...", InodeKind::File, file_meta()).unwrap();
        assert_eq!(fs.resolve("/...").unwrap().id, dotted.id);
    }

    #[test]
    fn read_to_extent_stops_at_reported_size() {
        let (_dir, fs) = scratch_fs(16);
        let file = fs.make_entry(ROOT_INODE, b"f", InodeKind::File, file_meta()).unwrap();
        assert!(fs.read_to_extent(file.id, 0, 100).unwrap().is_empty());

        fs.write(file.id, 4096 + 4090, b"abcdef").unwrap();
        let data = fs.read_to_extent(file.id, 4096 + 4090, 100).unwrap();
        assert_eq!(data, b"abcdef".to_vec());
        assert_eq!(fs.read_to_extent(file.id, 0, 3 * 4096).unwrap().len(), 2 * 4096);
        assert!(fs.read_to_extent(file.id, 2 * 4096, 10).unwrap().is_empty());
        assert!(matches!(fs.read_to_extent(ROOT_INODE, 0, 1), Err(Error::IsADirectory)));
    }

    #[test]
    fn listing_and_links() {
        let (_dir, fs) = scratch_fs(16);
        fs.make_entry(ROOT_INODE, b"docs", InodeKind::Directory, file_meta()).unwrap();
        fs.make_entry(ROOT_INODE, b"readme", InodeKind::File, file_meta()).unwrap();

        let listing: Vec<_> = fs
            .list_entries(ROOT_INODE)
            .unwrap()
            .into_iter()
            .map(|entry| (entry.name, entry.kind))
            .collect();
        assert_eq!(listing, vec![(b"docs".to_vec(), InodeKind::Directory), (b"readme".to_vec(), InodeKind::File)]);
        assert_eq!(fs.get_inode(ROOT_INODE).unwrap().links, 3);

        fs.rmdir(ROOT_INODE, b"docs").unwrap();
        assert_eq!(fs.get_inode(ROOT_INODE).unwrap().links, 2);
    }

    #[test]
    fn removal_frees_resources() {
        let (_dir, fs) = scratch_fs(16);
        let before = fs.statfs().unwrap();
        let file = fs.make_entry(ROOT_INODE, b"big", InodeKind::File, file_meta()).unwrap();
        fs.write(file.id, 0, &vec![0xAB; 3 * 4096]).unwrap();
        assert_eq!(fs.statfs().unwrap().free_blocks, before.free_blocks - 4);

        fs.unlink(ROOT_INODE, b"big").unwrap();
        let after = fs.statfs().unwrap();
        // The root directory keeps its entry block.
        assert_eq!(after.free_blocks, before.free_blocks - 1);
        assert_eq!(after.free_inodes, before.free_inodes);
        assert!(matches!(fs.get_inode(file.id), Err(Error::NotFound)));

        let again = fs.make_entry(ROOT_INODE, b"big", InodeKind::File, file_meta()).unwrap();
        assert_eq!(again.id, file.id);
        assert_eq!(fs.read(again.id, 0, 16).unwrap(), vec![0; 16]);
    }

    #[test]
    fn kind_checked_removal() {
        let (_dir, fs) = scratch_fs(16);
        let dir = fs.make_entry(ROOT_INODE, b"d", InodeKind::Directory, file_meta()).unwrap();
        fs.make_entry(ROOT_INODE, b"f", InodeKind::File, file_meta()).unwrap();
        fs.make_entry(dir.id, b"inner", InodeKind::File, file_meta()).unwrap();

        assert!(matches!(fs.unlink(ROOT_INODE, b"d"), Err(Error::IsADirectory)));
        assert!(matches!(fs.rmdir(ROOT_INODE, b"f"), Err(Error::NotADirectory)));
        assert!(matches!(fs.rmdir(ROOT_INODE, b"d"), Err(Error::DirectoryNotEmpty)));
        assert!(matches!(fs.remove_entry(ROOT_INODE, b"missing"), Err(Error::NotFound)));

        fs.unlink(dir.id, b"inner").unwrap();
        fs.rmdir(ROOT_INODE, b"d").unwrap();
        assert!(matches!(fs.resolve("/d"), Err(Error::NotFound)));
    }

    #[test]
    fn io_on_directories_rejected() {
        let (_dir, fs) = scratch_fs(16);
        assert!(matches!(fs.read(ROOT_INODE, 0, 1), Err(Error::IsADirectory)));
        assert!(matches!(fs.write(ROOT_INODE, 0, b"x"), Err(Error::IsADirectory)));
    }

    #[test]
    fn set_attr_updates_metadata() {
        let (_dir, fs) = scratch_fs(16);
        let file = fs.make_entry(ROOT_INODE, b"f", InodeKind::File, file_meta()).unwrap();
        let updated = fs
            .set_attr(file.id, SetAttr { permissions: Some(0o600), user_id: Some(42), ..SetAttr::default() })
            .unwrap();
        assert_eq!(updated.meta.permissions, 0o600);
        assert_eq!(updated.meta.user_id, 42);
        assert_eq!(updated.meta.group_id, 1000);
        assert_eq!(fs.get_inode(file.id).unwrap(), updated);
    }

    #[test]
    fn reported_size_covers_sparse_tail() {
        let (_dir, fs) = scratch_fs(16);
        let file = fs.make_entry(ROOT_INODE, b"sparse", InodeKind::File, file_meta()).unwrap();
        assert_eq!(fs.reported_size(&file), 0);

        fs.write(file.id, 5 * 4096 + 1, b"z").unwrap();
        let inode = fs.get_inode(file.id).unwrap();
        assert_eq!(inode.size, 4096);
        assert_eq!(fs.reported_size(&inode), 6 * 4096);
    }

    #[test]
    fn survives_remount() {
        let (dir, fs) = scratch_fs(16);
        let sub = fs.make_entry(ROOT_INODE, b"sub", InodeKind::Directory, file_meta()).unwrap();
        let file = fs.make_entry(sub.id, b"data", InodeKind::File, file_meta()).unwrap();
        fs.write(file.id, 100, b"persisted").unwrap();
        fs.close().unwrap();
        drop(fs);

        let fs = TinyFs::mount(FileDrive::open(image_path(&dir), 512).unwrap()).unwrap();
        let found = fs.resolve("/sub/data").unwrap();
        assert_eq!(found.id, file.id);
        assert_eq!(fs.read(found.id, 100, 9).unwrap(), b"persisted".to_vec());
    }

    #[test]
    fn concurrent_writers() {
        let (_dir, fs) = scratch_fs(32);
        let fs = Arc::new(fs);

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let fs = Arc::clone(&fs);
                thread::spawn(move || {
                    let name = format!("worker-{}", t);
                    let file = fs.make_entry(ROOT_INODE, name.as_bytes(), InodeKind::File, Metadata::default()).unwrap();
                    let data = vec![t; 2 * 4096 + 300];
                    for _ in 0..5 {
                        fs.write(file.id, 700, &data).unwrap();
                        assert_eq!(fs.read(file.id, 700, data.len()).unwrap(), data);
                    }
                    file.id
                })
            })
            .collect();

        let mut ids: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(fs.list_entries(ROOT_INODE).unwrap().len(), 4);
    }
}
