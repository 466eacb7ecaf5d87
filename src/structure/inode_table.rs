use log::trace;

use crate::consts::InodeId;
use crate::driver::DeviceDriver;
use crate::io::IO;
use crate::structure::inode::Inode;
use crate::util::error::{Error, Result};
use crate::util::serializable::{ByteSerializable, KnownSize};

/// Fixed-size inode records packed into a contiguous run of blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct InodeTable {
    pub(crate) table_block: u64,
    pub(crate) inode_count: u32,
}

impl InodeTable {
    pub fn new(table_block: u64, inode_count: u32) -> InodeTable {
        InodeTable { table_block, inode_count }
    }

    pub fn block_count(&self, block_size: usize) -> u64 {
        (self.inode_count as u64).div_ceil(Self::inodes_per_block(block_size))
    }

    pub fn clear<A: DeviceDriver>(&self, io: &mut IO<A>) -> Result<()> {
        for i in 0..self.block_count(io.get_block_size()) {
            io.zero_block(self.table_block + i)?;
        }
        Ok(())
    }

    pub fn read_inode<A: DeviceDriver>(&self, io: &IO<A>, index: InodeId) -> Result<Inode> {
        self.check_range(index)?;
        let inode_block = self.inode_block(index, io.get_block_size());
        let offset = Self::inode_offset(index, io.get_block_size());

        let block = io.read_block(inode_block)?;
        Ok(Inode::from_bytes(&block[offset..offset + Inode::size_on_disk()]))
    }

    /// Read-modify-write of the block that holds the record.
    pub fn write_inode<A: DeviceDriver>(&self, io: &mut IO<A>, inode: &Inode) -> Result<()> {
        self.check_range(inode.id)?;
        let inode_block = self.inode_block(inode.id, io.get_block_size());
        let offset = Self::inode_offset(inode.id, io.get_block_size());

        let mut block = io.read_block(inode_block)?;
        block[offset..offset + Inode::size_on_disk()].copy_from_slice(&inode.to_bytes());
        trace!("Writing inode {} to block {} at {}", inode.id, inode_block, offset);
        io.write_block(inode_block, &block)
    }

    #[inline]
    fn inodes_per_block(block_size: usize) -> u64 {
        (block_size / Inode::size_on_disk()) as u64
    }

    #[inline]
    fn inode_block(&self, index: InodeId, block_size: usize) -> u64 {
        self.table_block + index as u64 / Self::inodes_per_block(block_size)
    }

    #[inline]
    fn inode_offset(index: InodeId, block_size: usize) -> usize {
        (index as u64 % Self::inodes_per_block(block_size)) as usize * Inode::size_on_disk()
    }

    fn check_range(&self, index: InodeId) -> Result<()> {
        if index >= self.inode_count {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}
