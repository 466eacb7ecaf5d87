use log::debug;

use crate::consts::{InodeId, FILE_NAME_LENGTH, UNALLOCATED};
use crate::driver::DeviceDriver;
use crate::structure::inode::Inode;
use crate::structure::Structure;
use crate::util::error::{Error, Result};
use crate::util::serializable::{read_u16, read_u32, ByteSerializable, KnownSize};

const ENTRY_SIZE: usize = 256;
const NAME_OFFSET: usize = 8;

/// Fixed-size slot in a directory block. Names are not null-terminated; `name` holds
/// exactly the stored length.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub valid: bool,
    pub inode: InodeId,
    pub name: Vec<u8>,
}

impl DirEntry {
    pub fn new(inode: InodeId, name: &[u8]) -> DirEntry {
        DirEntry { valid: true, inode, name: name.to_vec() }
    }

    fn matches(&self, name: &[u8]) -> bool {
        self.valid && self.name == name
    }
}

impl ByteSerializable for DirEntry {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; ENTRY_SIZE];
        bytes[0] = self.valid as u8;
        bytes[2..4].copy_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes[4..8].copy_from_slice(&self.inode.to_le_bytes());
        bytes[NAME_OFFSET..NAME_OFFSET + self.name.len()].copy_from_slice(&self.name);
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let name_length = (read_u16(bytes, 2) as usize).min(FILE_NAME_LENGTH);
        DirEntry {
            valid: bytes[0] != 0,
            inode: read_u32(bytes, 4),
            name: bytes[NAME_OFFSET..NAME_OFFSET + name_length].to_vec(),
        }
    }
}

impl KnownSize for DirEntry {
    fn size_on_disk() -> usize {
        ENTRY_SIZE
    }
}

fn slots(block: &[u8]) -> impl Iterator<Item = (usize, DirEntry)> + '_ {
    block
        .chunks_exact(ENTRY_SIZE)
        .enumerate()
        .map(|(slot, bytes)| (slot * ENTRY_SIZE, DirEntry::from_bytes(bytes)))
}

fn check_name(name: &[u8]) -> Result<()> {
    if name.len() > FILE_NAME_LENGTH {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

impl<A: DeviceDriver> Structure<A> {
    /// Scans every allocated pointer of `dir`, skipping holes, for a valid entry named `name`.
    pub fn find_entry(&self, dir: InodeId, name: &[u8]) -> Result<DirEntry> {
        check_name(name)?;
        let dir_inode = self.read_directory(dir)?;

        for pointer in dir_inode.allocated_blocks() {
            let block = self.read_block(pointer)?;
            let found = slots(&block).find(|(_, entry)| entry.matches(name));
            if let Some((_, entry)) = found {
                return Ok(entry);
            }
        }
        Err(Error::NotFound)
    }

    /// Adds `name -> child` to `dir`, reusing the first tombstoned slot before growing the directory.
    pub fn add_entry(&mut self, dir: InodeId, child: InodeId, name: &[u8]) -> Result<()> {
        match self.find_entry(dir, name) {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let mut dir_inode = self.read_directory(dir)?;
        let entry = DirEntry::new(child, name).to_bytes();

        for pointer in dir_inode.allocated_blocks() {
            let mut block = self.read_block(pointer)?;
            let free = slots(&block).find(|(_, slot)| !slot.valid).map(|(offset, _)| offset);
            if let Some(offset) = free {
                block[offset..offset + ENTRY_SIZE].copy_from_slice(&entry);
                self.write_block(pointer, &block)?;
                debug!("Added {:?} -> {} to directory {} in block {}", String::from_utf8_lossy(name), child, dir, pointer);
                return Ok(());
            }
        }

        let free_slot = dir_inode
            .pointers
            .iter()
            .position(|pointer| *pointer == UNALLOCATED)
            .ok_or(Error::NoSpace)?;

        let pointer = self.allocate_block()?;
        let mut block = vec![0u8; self.get_block_size()];
        block[..ENTRY_SIZE].copy_from_slice(&entry);
        self.write_block(pointer, &block)?;

        dir_inode.pointers[free_slot] = pointer;
        dir_inode.size += self.get_block_size() as u64;
        self.write_inode(&dir_inode)?;
        debug!("Added {:?} -> {} to directory {} in new block {}", String::from_utf8_lossy(name), child, dir, pointer);
        Ok(())
    }

    /// Tombstones the entry named `name` and returns it. The slot stays allocated for reuse.
    pub fn remove_entry(&mut self, dir: InodeId, name: &[u8]) -> Result<DirEntry> {
        check_name(name)?;
        let dir_inode = self.read_directory(dir)?;

        for pointer in dir_inode.allocated_blocks() {
            let mut block = self.read_block(pointer)?;
            let found = slots(&block).find(|(_, entry)| entry.matches(name));
            if let Some((offset, entry)) = found {
                block[offset] = 0;
                self.write_block(pointer, &block)?;
                debug!("Removed {:?} from directory {}", String::from_utf8_lossy(name), dir);
                return Ok(entry);
            }
        }
        Err(Error::NotFound)
    }

    /// Valid entries of `dir` in pointer and slot order.
    pub fn list_entries(&self, dir: InodeId) -> Result<Vec<DirEntry>> {
        let dir_inode = self.read_directory(dir)?;
        let mut entries = Vec::new();

        for pointer in dir_inode.allocated_blocks() {
            let block = self.read_block(pointer)?;
            entries.extend(slots(&block).map(|(_, entry)| entry).filter(|entry| entry.valid));
        }
        Ok(entries)
    }

    pub fn is_empty_directory(&self, dir: InodeId) -> Result<bool> {
        Ok(self.list_entries(dir)?.is_empty())
    }

    fn read_directory(&self, dir: InodeId) -> Result<Inode> {
        let inode = self.read_valid_inode(dir)?;
        if !inode.is_directory() {
            return Err(Error::NotADirectory);
        }
        Ok(inode)
    }
}
