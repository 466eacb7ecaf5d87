use log::{debug, info};

use crate::consts::{BlockPointer, InodeId, BLOCK_SIZE, DEFAULT_INODE_COUNT, RESERVED_INODE, ROOT_INODE};
use crate::driver::DeviceDriver;
use crate::io::IO;
use crate::structure::bitmap::Bitmap;
use crate::structure::inode::{Inode, InodeKind};
use crate::structure::inode_table::InodeTable;
use crate::structure::meta::{GroupId, Metadata, UserId};
use crate::structure::superblock::SuperBlock;
use crate::util::error::{Error, Result};

pub mod bitmap;
pub mod directory;
pub mod inode;
pub mod inode_table;
pub mod meta;
pub mod superblock;

/// Parameters fixed when an image is formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatOptions {
    pub max_inodes: u32,
    pub user_id: UserId,
    pub group_id: GroupId,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions { max_inodes: DEFAULT_INODE_COUNT, user_id: 0, group_id: 0 }
    }
}

/// Everything derived from the superblock, plus the device it describes.
pub struct Structure<A: DeviceDriver> {
    pub(crate) io: IO<A>,
    pub(crate) superblock: SuperBlock,
    pub(crate) inode_bitmap: Bitmap,
    pub(crate) data_bitmap: Bitmap,
    pub(crate) inode_table: InodeTable,
}

impl<A: DeviceDriver> Structure<A> {
    pub fn format(device: A, options: &FormatOptions) -> Result<Structure<A>> {
        let mut io = IO::new(device, BLOCK_SIZE)?;
        let superblock = SuperBlock::new(io.get_block_size(), io.get_block_count(), options.max_inodes)?;
        superblock.write(&mut io)?;

        let mut structure = Structure::from_superblock(io, superblock);
        structure.inode_bitmap.clear(&mut structure.io)?;
        structure.data_bitmap.clear(&mut structure.io)?;
        structure.inode_table.clear(&mut structure.io)?;

        structure.inode_bitmap.mark_used(&mut structure.io, RESERVED_INODE as u64)?;
        structure.inode_bitmap.mark_used(&mut structure.io, ROOT_INODE as u64)?;

        let mut root = Inode::new(ROOT_INODE, InodeKind::Directory);
        root.links = 2;
        root.meta = Metadata::new(0o755, options.user_id, options.group_id);
        structure.write_inode(&root)?;

        info!(
            "Formatted {} blocks: {} inodes, {} data blocks starting at {}",
            structure.superblock.block_count,
            structure.superblock.max_inodes,
            structure.superblock.max_blocks,
            structure.superblock.data_region_block
        );
        Ok(structure)
    }

    pub fn mount(device: A) -> Result<Structure<A>> {
        let io = IO::new(device, BLOCK_SIZE)?;
        match SuperBlock::read(&io)? {
            Some(superblock) => {
                info!("Mounted image: {:?}", superblock);
                Ok(Structure::from_superblock(io, superblock))
            }
            None => Err(Error::InvalidImage("no superblock found".to_string())),
        }
    }

    fn from_superblock(io: IO<A>, superblock: SuperBlock) -> Structure<A> {
        let inode_bitmap = Bitmap::new(superblock.inode_bitmap_block as u64, superblock.max_inodes as u64);
        let data_bitmap = Bitmap::new(superblock.data_bitmap_block as u64, superblock.max_blocks as u64);
        let inode_table = InodeTable::new(superblock.inode_table_block as u64, superblock.max_inodes);
        Structure { io, superblock, inode_bitmap, data_bitmap, inode_table }
    }

    #[inline]
    pub fn get_block_size(&self) -> usize {
        self.io.get_block_size()
    }

    pub fn allocate_inode(&mut self) -> Result<InodeId> {
        let index = self.inode_bitmap.allocate(&mut self.io)?.ok_or(Error::Exhausted)?;
        debug!("Allocated inode {}", index);
        Ok(index as InodeId)
    }

    /// Returns an absolute block number inside the data region.
    pub fn allocate_block(&mut self) -> Result<BlockPointer> {
        let index = self.data_bitmap.allocate(&mut self.io)?.ok_or(Error::Exhausted)?;
        let block = self.superblock.data_region_block + index as BlockPointer;
        debug!("Allocated block {}", block);
        Ok(block)
    }

    pub fn free_inode(&mut self, id: InodeId) -> Result<()> {
        if id == RESERVED_INODE || id == ROOT_INODE || id >= self.superblock.max_inodes {
            return Err(Error::NotFound);
        }
        debug!("Freeing inode {}", id);
        self.inode_bitmap.mark_free(&mut self.io, id as u64)
    }

    pub fn free_block(&mut self, block: BlockPointer) -> Result<()> {
        let index = self.data_index(block)?;
        debug!("Freeing block {}", block);
        self.data_bitmap.mark_free(&mut self.io, index)
    }

    pub fn is_block_allocated(&self, block: BlockPointer) -> Result<bool> {
        let index = self.data_index(block)?;
        self.data_bitmap.is_used(&self.io, index)
    }

    pub fn is_inode_allocated(&self, id: InodeId) -> Result<bool> {
        if id >= self.superblock.max_inodes {
            return Ok(false);
        }
        self.inode_bitmap.is_used(&self.io, id as u64)
    }

    pub fn read_inode(&self, id: InodeId) -> Result<Inode> {
        self.inode_table.read_inode(&self.io, id)
    }

    pub fn write_inode(&mut self, inode: &Inode) -> Result<()> {
        self.inode_table.write_inode(&mut self.io, inode)
    }

    /// Reads an inode that must currently be in use.
    pub fn read_valid_inode(&self, id: InodeId) -> Result<Inode> {
        let inode = self.read_inode(id)?;
        if !inode.valid || id == RESERVED_INODE {
            return Err(Error::NotFound);
        }
        Ok(inode)
    }

    pub(crate) fn read_block(&self, block: BlockPointer) -> Result<Vec<u8>> {
        self.io.read_block(block as u64)
    }

    pub(crate) fn write_block(&mut self, block: BlockPointer, data: &[u8]) -> Result<()> {
        self.io.write_block(block as u64, data)
    }

    pub(crate) fn zero_block(&mut self, block: BlockPointer) -> Result<()> {
        self.io.zero_block(block as u64)
    }

    pub fn free_inode_count(&self) -> Result<u64> {
        self.inode_bitmap.count_free(&self.io)
    }

    pub fn free_block_count(&self) -> Result<u64> {
        self.data_bitmap.count_free(&self.io)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.io.flush()
    }

    fn data_index(&self, block: BlockPointer) -> Result<u64> {
        let first = self.superblock.data_region_block;
        if block < first || block - first >= self.superblock.max_blocks {
            return Err(Error::BlockOutOfRange(block as u64));
        }
        Ok((block - first) as u64)
    }
}
