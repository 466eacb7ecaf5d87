pub const BLOCK_SIZE: usize = 4096;
pub const SECTOR_SIZE: usize = 512;
pub const DISK_SIZE: u64 = 32 * 1024 * 1024;

pub const MAGIC: u32 = 0x5C;
pub const DEFAULT_INODE_COUNT: u32 = 1024;
pub const DIRECT_POINTERS: usize = 16;
pub const FILE_NAME_LENGTH: usize = 248;

/// Inode 0 is never handed out; the root directory always lives at 1.
pub const RESERVED_INODE: InodeId = 0;
pub const ROOT_INODE: InodeId = 1;

/// Marks a direct pointer that does not reference a block.
pub const UNALLOCATED: BlockPointer = u32::MAX;

pub type BlockPointer = u32;
pub type InodeId = u32;
pub type DirectPointers = [BlockPointer; DIRECT_POINTERS];
