use log::trace;

use crate::consts::{DIRECT_POINTERS, UNALLOCATED};
use crate::driver::DeviceDriver;
use crate::structure::inode::Inode;
use crate::structure::Structure;
use crate::util::error::{Error, Result};

/// One block's share of a byte range.
struct Span {
    index: usize,
    in_block: usize,
    length: usize,
    buffer_offset: usize,
}

fn spans(offset: u64, length: usize, block_size: usize) -> impl Iterator<Item = Span> {
    let block_size = block_size as u64;
    let end = offset + length as u64;
    let mut position = offset;

    std::iter::from_fn(move || {
        if position >= end {
            return None;
        }
        let in_block = position % block_size;
        let span_length = (block_size - in_block).min(end - position);
        let span = Span {
            index: (position / block_size) as usize,
            in_block: in_block as usize,
            length: span_length as usize,
            buffer_offset: (position - offset) as usize,
        };
        position += span_length;
        Some(span)
    })
}

impl<A: DeviceDriver> Structure<A> {
    pub fn max_file_size(&self) -> u64 {
        (DIRECT_POINTERS * self.get_block_size()) as u64
    }

    fn check_range(&self, offset: u64, length: usize) -> Result<()> {
        match offset.checked_add(length as u64) {
            Some(end) if end <= self.max_file_size() => Ok(()),
            _ => Err(Error::FileTooBig),
        }
    }

    /// Copies `[offset, offset + size)` out of the inode's blocks. Unallocated blocks read as zeros.
    pub fn read_data(&self, inode: &Inode, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.check_range(offset, size)?;
        let mut result = vec![0u8; size];

        for span in spans(offset, size, self.get_block_size()) {
            let pointer = inode.pointers[span.index];
            if pointer == UNALLOCATED {
                continue;
            }
            let block = self.read_block(pointer)?;
            result[span.buffer_offset..span.buffer_offset + span.length]
                .copy_from_slice(&block[span.in_block..span.in_block + span.length]);
        }
        Ok(result)
    }

    /// Writes `data` at `offset`, allocating and zeroing any block the range touches for the first time.
    ///
    /// The inode is persisted as soon as a new pointer is assigned.
    pub fn write_data(&mut self, inode: &mut Inode, offset: u64, data: &[u8]) -> Result<usize> {
        self.check_range(offset, data.len())?;
        let block_size = self.get_block_size();

        for span in spans(offset, data.len(), block_size) {
            let mut pointer = inode.pointers[span.index];
            if pointer == UNALLOCATED {
                pointer = self.allocate_block()?;
                self.zero_block(pointer)?;
                inode.pointers[span.index] = pointer;
                inode.size += block_size as u64;
                self.write_inode(inode)?;
                trace!("Inode {} now maps index {} to block {}", inode.id, span.index, pointer);
            }

            let source = &data[span.buffer_offset..span.buffer_offset + span.length];
            if span.length == block_size {
                self.write_block(pointer, source)?;
            } else {
                let mut block = self.read_block(pointer)?;
                block[span.in_block..span.in_block + span.length].copy_from_slice(source);
                self.write_block(pointer, &block)?;
            }
        }
        Ok(data.len())
    }

    /// Releases every data block owned by `inode` and clears its pointers.
    pub fn release_data(&mut self, inode: &mut Inode) -> Result<()> {
        for pointer in inode.pointers.iter_mut() {
            if *pointer != UNALLOCATED {
                self.free_block(*pointer)?;
                *pointer = UNALLOCATED;
            }
        }
        inode.size = 0;
        Ok(())
    }
}
