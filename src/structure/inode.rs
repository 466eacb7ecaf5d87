use crate::consts::{BlockPointer, DirectPointers, InodeId, DIRECT_POINTERS, UNALLOCATED};
use crate::structure::meta::Metadata;
use crate::util::serializable::{read_u32, read_u64, ByteSerializable, KnownSize};

const INODE_SIZE: usize = 128;
const META_OFFSET: usize = 18;
const POINTERS_OFFSET: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Directory,
    File,
}

impl InodeKind {
    fn to_byte(self) -> u8 {
        match self {
            InodeKind::Directory => 0,
            InodeKind::File => 1,
        }
    }

    fn from_byte(byte: u8) -> InodeKind {
        match byte {
            1 => InodeKind::File,
            _ => InodeKind::Directory,
        }
    }
}

/// On-disk inode. `size` counts allocated capacity: every block handed to the
/// inode adds one block size, however few bytes were written into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Inode {
    pub(crate) id: InodeId,
    pub(crate) kind: InodeKind,
    pub(crate) valid: bool,
    pub(crate) size: u64,
    pub(crate) links: u32,
    pub(crate) pointers: DirectPointers,
    pub(crate) meta: Metadata,
}

impl Inode {
    /// A fresh, valid inode with no blocks. Not persisted until written through the table.
    pub fn new(id: InodeId, kind: InodeKind) -> Inode {
        Inode {
            id,
            kind,
            valid: true,
            size: 0,
            links: 0,
            pointers: [UNALLOCATED; DIRECT_POINTERS],
            meta: Metadata::default(),
        }
    }

    #[inline]
    pub fn is_directory(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn allocated_blocks(&self) -> impl Iterator<Item = BlockPointer> + '_ {
        self.pointers.iter().copied().filter(|pointer| *pointer != UNALLOCATED)
    }

    pub fn used_pointers(&self) -> usize {
        self.allocated_blocks().count()
    }

    /// Byte length up to the end of the highest allocated block.
    pub fn extent(&self, block_size: usize) -> u64 {
        self.pointers
            .iter()
            .rposition(|pointer| *pointer != UNALLOCATED)
            .map_or(0, |last| (last as u64 + 1) * block_size as u64)
    }

    fn pointers_to_bytes(pointers: &DirectPointers) -> Vec<u8> {
        pointers.iter().flat_map(|pointer| pointer.to_le_bytes()).collect()
    }

    fn bytes_to_pointers(data: &[u8]) -> DirectPointers {
        let mut pointers = [UNALLOCATED; DIRECT_POINTERS];
        for (i, pointer) in pointers.iter_mut().enumerate() {
            *pointer = read_u32(data, i * 4);
        }
        pointers
    }
}

impl ByteSerializable for Inode {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::<u8>::with_capacity(INODE_SIZE);
        bytes.extend_from_slice(&self.id.to_le_bytes());
        bytes.push(self.valid as u8);
        bytes.push(self.kind.to_byte());
        bytes.extend_from_slice(&self.size.to_le_bytes());
        bytes.extend_from_slice(&self.links.to_le_bytes());
        bytes.extend_from_slice(&self.meta.to_bytes());
        bytes.extend_from_slice(&Inode::pointers_to_bytes(&self.pointers));
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        Inode {
            id: read_u32(bytes, 0),
            valid: bytes[4] != 0,
            kind: InodeKind::from_byte(bytes[5]),
            size: read_u64(bytes, 6),
            links: read_u32(bytes, 14),
            meta: Metadata::from_bytes(&bytes[META_OFFSET..POINTERS_OFFSET]),
            pointers: Inode::bytes_to_pointers(&bytes[POINTERS_OFFSET..INODE_SIZE]),
        }
    }
}

impl KnownSize for Inode {
    #[inline]
    fn size_on_disk() -> usize {
        INODE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::{Inode, InodeKind};
    use crate::consts::{DIRECT_POINTERS, UNALLOCATED};
    use crate::structure::meta::Metadata;
    use crate::util::serializable::{ByteSerializable, KnownSize};

    #[test]
    fn layout_fits() {
        assert_eq!(18 + <Metadata as KnownSize>::size_on_disk(), 64);
        assert_eq!(64 + DIRECT_POINTERS * 4, Inode::size_on_disk());
    }

    #[test]
    fn new_inode_is_empty() {
        let inode = Inode::new(7, InodeKind::File);
        assert!(inode.valid);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.links, 0);
        assert_eq!(inode.pointers, [UNALLOCATED; DIRECT_POINTERS]);
        assert_eq!(inode.used_pointers(), 0);
        assert_eq!(inode.extent(4096), 0);
    }

    #[test]
    fn inode_bytes() {
        let mut inode = Inode::new(42, InodeKind::Directory);
        inode.size = 3 * 4096;
        inode.links = 2;
        inode.pointers[0] = 100;
        inode.pointers[5] = 101;
        inode.pointers[9] = 0;
        inode.meta = Metadata::new(0o755, 1000, 1000);

        let bytes = inode.to_bytes();
        assert_eq!(bytes.len(), Inode::size_on_disk());
        assert_eq!(Inode::from_bytes(&bytes), inode);
    }

    #[test]
    fn extent_follows_highest_pointer() {
        let mut inode = Inode::new(3, InodeKind::File);
        inode.pointers[0] = 50;
        inode.pointers[4] = 51;
        assert_eq!(inode.used_pointers(), 2);
        assert_eq!(inode.extent(4096), 5 * 4096);
    }
}
