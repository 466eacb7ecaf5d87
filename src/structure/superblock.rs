use crate::consts::MAGIC;
use crate::driver::DeviceDriver;
use crate::io::IO;
use crate::structure::inode::Inode;
use crate::util::error::{Error, Result};
use crate::util::serializable::{read_u32, ByteSerializable, KnownSize};

const SUPERBLOCK_INDEX: u64 = 0;
const INODE_BITMAP_START: u32 = 1;

/// Region layout of an image. Fixed at format time.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperBlock {
    pub magic: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub max_inodes: u32,
    pub max_blocks: u32,
    pub inode_bitmap_block: u32,
    pub data_bitmap_block: u32,
    pub inode_table_block: u32,
    pub data_region_block: u32,
}

impl SuperBlock {
    /// Computes the layout for an image of `block_count` blocks holding `max_inodes` inodes.
    pub fn new(block_size: usize, block_count: u64, max_inodes: u32) -> Result<SuperBlock> {
        if max_inodes < 2 {
            return Err(Error::InvalidImage(format!("at least 2 inodes are required, got {}", max_inodes)));
        }
        let block_count = u32::try_from(block_count)
            .map_err(|_| Error::InvalidImage(format!("{} blocks is too many", block_count)))?;

        let bits_per_block = (block_size * 8) as u32;
        let inodes_per_block = (block_size / Inode::size_on_disk()) as u32;
        let inode_bitmap_blocks = max_inodes.div_ceil(bits_per_block);
        let inode_table_blocks = max_inodes.div_ceil(inodes_per_block);

        let remaining = block_count
            .checked_sub(1 + inode_bitmap_blocks + inode_table_blocks)
            .filter(|remaining| *remaining > 1)
            .ok_or_else(|| Error::InvalidImage(format!("{} blocks cannot hold {} inodes", block_count, max_inodes)))?;
        let data_bitmap_blocks = remaining.div_ceil(bits_per_block + 1);

        let data_bitmap_block = INODE_BITMAP_START + inode_bitmap_blocks;
        let inode_table_block = data_bitmap_block + data_bitmap_blocks;
        let data_region_block = inode_table_block + inode_table_blocks;

        Ok(SuperBlock {
            magic: MAGIC,
            block_size: block_size as u32,
            block_count,
            max_inodes,
            max_blocks: block_count - data_region_block,
            inode_bitmap_block: INODE_BITMAP_START,
            data_bitmap_block,
            inode_table_block,
            data_region_block,
        })
    }

    /// Returns `None` when block 0 does not carry the magic number.
    pub fn read<A: DeviceDriver>(io: &IO<A>) -> Result<Option<SuperBlock>> {
        let buffer = io.read_block(SUPERBLOCK_INDEX)?;
        if read_u32(&buffer, 0) != MAGIC {
            return Ok(None);
        }

        let superblock = SuperBlock::from_bytes(&buffer);
        superblock.validate(io)?;
        Ok(Some(superblock))
    }

    pub fn write<A: DeviceDriver>(&self, io: &mut IO<A>) -> Result<()> {
        let mut buffer = self.to_bytes();
        buffer.resize(io.get_block_size(), 0);
        io.write_block(SUPERBLOCK_INDEX, &buffer)
    }

    fn validate<A: DeviceDriver>(&self, io: &IO<A>) -> Result<()> {
        if self.block_size as usize != io.get_block_size() {
            return Err(Error::InvalidImage(format!(
                "image uses {} byte blocks, expected {}",
                self.block_size,
                io.get_block_size()
            )));
        }

        let ordered = self.inode_bitmap_block < self.data_bitmap_block
            && self.data_bitmap_block < self.inode_table_block
            && self.inode_table_block < self.data_region_block;
        let fits = self.block_count as u64 <= io.get_block_count()
            && self.data_region_block as u64 + self.max_blocks as u64 == self.block_count as u64;
        if !ordered || !fits {
            return Err(Error::InvalidImage(format!("inconsistent layout {:?}", self)));
        }
        Ok(())
    }
}

impl ByteSerializable for SuperBlock {
    fn to_bytes(&self) -> Vec<u8> {
        [
            self.magic,
            self.block_size,
            self.block_count,
            self.max_inodes,
            self.max_blocks,
            self.inode_bitmap_block,
            self.data_bitmap_block,
            self.inode_table_block,
            self.data_region_block,
        ]
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect()
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        SuperBlock {
            magic: read_u32(bytes, 0),
            block_size: read_u32(bytes, 4),
            block_count: read_u32(bytes, 8),
            max_inodes: read_u32(bytes, 12),
            max_blocks: read_u32(bytes, 16),
            inode_bitmap_block: read_u32(bytes, 20),
            data_bitmap_block: read_u32(bytes, 24),
            inode_table_block: read_u32(bytes, 28),
            data_region_block: read_u32(bytes, 32),
        }
    }
}

impl KnownSize for SuperBlock {
    fn size_on_disk() -> usize {
        36
    }
}

#[cfg(test)]
mod tests {
    use super::SuperBlock;
    use crate::consts::{BLOCK_SIZE, SECTOR_SIZE};
    use crate::driver::file_drive::FileDrive;
    use crate::io::IO;
    use crate::util::error::Error;
    use crate::util::serializable::{ByteSerializable, KnownSize};

    #[test]
    fn default_layout() {
        let superblock = SuperBlock::new(BLOCK_SIZE, 8192, 1024).unwrap();
        assert_eq!(superblock.inode_bitmap_block, 1);
        assert_eq!(superblock.data_bitmap_block, 2);
        assert_eq!(superblock.inode_table_block, 3);
        assert_eq!(superblock.data_region_block, 35);
        assert_eq!(superblock.max_blocks, 8157);
        assert_eq!(superblock.to_bytes().len(), SuperBlock::size_on_disk());
    }

    #[test]
    fn too_small() {
        assert!(matches!(SuperBlock::new(BLOCK_SIZE, 8, 1024), Err(Error::InvalidImage(_))));
        assert!(matches!(SuperBlock::new(BLOCK_SIZE, 8192, 1), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn read_write_superblock() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::init(dir.path().join("sb.img"), 256 * 4096, SECTOR_SIZE).unwrap();
        let mut io = IO::new(drive, BLOCK_SIZE).unwrap();

        assert_eq!(SuperBlock::read(&io).unwrap(), None);

        let superblock = SuperBlock::new(BLOCK_SIZE, io.get_block_count(), 64).unwrap();
        superblock.write(&mut io).unwrap();
        assert_eq!(SuperBlock::read(&io).unwrap(), Some(superblock));
    }

    #[test]
    fn rejects_mismatched_block_size() {
        let dir = tempfile::tempdir().unwrap();
        let drive = FileDrive::init(dir.path().join("sb.img"), 256 * 4096, SECTOR_SIZE).unwrap();
        let mut io = IO::new(drive, BLOCK_SIZE).unwrap();

        let mut superblock = SuperBlock::new(BLOCK_SIZE, io.get_block_count(), 64).unwrap();
        superblock.block_size = 1024;
        superblock.write(&mut io).unwrap();
        assert!(matches!(SuperBlock::read(&io), Err(Error::InvalidImage(_))));
    }
}
