use crate::structure::inode::InodeKind;

pub type ModeBits = u32;

const PERMISSIONS_MASK: ModeBits = 0o777;
const FILE_TYPE_MASK: ModeBits = 0o170000;
const IS_DIR_MASK: ModeBits = 0o040000;
const IS_FILE_MASK: ModeBits = 0o100000;

pub trait ModeBitsHelper {
    fn get_permissions(&self, umask: ModeBits) -> u16;
    fn is_directory(&self) -> bool;
    fn is_file(&self) -> bool;
    fn kind_or(&self, fallback: InodeKind) -> InodeKind;
}

impl ModeBitsHelper for ModeBits {
    fn get_permissions(&self, umask: ModeBits) -> u16 {
        (self & !umask & PERMISSIONS_MASK) as u16
    }

    fn is_directory(&self) -> bool {
        (self & FILE_TYPE_MASK) == IS_DIR_MASK
    }

    fn is_file(&self) -> bool {
        (self & FILE_TYPE_MASK) == IS_FILE_MASK
    }

    /// Type bits are optional on mkdir, so callers supply what they expect.
    fn kind_or(&self, fallback: InodeKind) -> InodeKind {
        if self.is_directory() {
            InodeKind::Directory
        } else if self.is_file() {
            InodeKind::File
        } else {
            fallback
        }
    }
}
