use log::trace;

use crate::consts::{InodeId, FILE_NAME_LENGTH, ROOT_INODE};
use crate::driver::DeviceDriver;
use crate::structure::inode::Inode;
use crate::structure::Structure;
use crate::util::error::{Error, Result};

const SEPARATOR: char = '/';

impl<A: DeviceDriver> Structure<A> {
    /// Walks `path` one component at a time starting at `start`.
    ///
    /// Empty components are skipped, so `a//b` and `a/b/` name the same inode as `a/b`.
    /// Every intermediate inode must be a directory. A component too long to be stored
    /// cannot name anything, so it resolves to `NotFound`.
    pub fn resolve_path(&self, path: &str, start: InodeId) -> Result<Inode> {
        if path == "/" {
            return self.read_valid_inode(ROOT_INODE);
        }

        let mut current = start;
        for component in path.split(SEPARATOR).filter(|component| !component.is_empty()) {
            if component.len() > FILE_NAME_LENGTH {
                return Err(Error::NotFound);
            }
            let entry = self.find_entry(current, component.as_bytes())?;
            trace!("Resolved {:?} under {} to {}", component, current, entry.inode);
            current = entry.inode;
        }
        self.read_valid_inode(current)
    }
}
