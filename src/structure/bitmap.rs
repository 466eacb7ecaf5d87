use log::trace;

use crate::driver::DeviceDriver;
use crate::io::IO;
use crate::util::error::Result;

/// One bit per allocatable unit, persisted in a run of blocks starting at `first_block`.
///
/// The bitmap is never cached: every call reads the owning block from the device and
/// writes it back before returning.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub(crate) first_block: u64,
    pub(crate) capacity: u64,
}

impl Bitmap {
    pub fn new(first_block: u64, capacity: u64) -> Bitmap {
        Bitmap { first_block, capacity }
    }

    pub fn block_count(&self, block_size: usize) -> u64 {
        self.capacity.div_ceil(block_size as u64 * 8)
    }

    /// Zeroes every block of the bitmap.
    pub fn clear<A: DeviceDriver>(&self, io: &mut IO<A>) -> Result<()> {
        for i in 0..self.block_count(io.get_block_size()) {
            io.zero_block(self.first_block + i)?;
        }
        Ok(())
    }

    /// Sets the first clear bit and returns its index, or `None` when every bit is taken.
    pub fn allocate<A: DeviceDriver>(&self, io: &mut IO<A>) -> Result<Option<u64>> {
        let bits_per_block = io.get_block_size() as u64 * 8;

        for block_index in 0..self.block_count(io.get_block_size()) {
            let mut block = io.read_block(self.first_block + block_index)?;
            let base = block_index * bits_per_block;

            for byte_index in 0..block.len() {
                let byte = block[byte_index];
                if byte == u8::MAX {
                    continue;
                }

                let bit = byte.trailing_ones() as u64;
                let result = base + byte_index as u64 * 8 + bit;
                if result >= self.capacity {
                    return Ok(None);
                }

                block[byte_index] |= 1 << bit;
                io.write_block(self.first_block + block_index, &block)?;
                trace!("Allocated bit {} of bitmap at block {}", result, self.first_block);
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    pub fn is_used<A: DeviceDriver>(&self, io: &IO<A>, index: u64) -> Result<bool> {
        let (block, byte_index, bit_index) = self.locate(index, io.get_block_size());
        let block = io.read_block(block)?;
        Ok(block[byte_index] & (1 << bit_index) != 0)
    }

    pub(crate) fn mark_used<A: DeviceDriver>(&self, io: &mut IO<A>, index: u64) -> Result<()> {
        trace!("Marking used: {} in bitmap at block {}", index, self.first_block);
        self.update(io, index, |byte, mask| byte | mask)
    }

    pub(crate) fn mark_free<A: DeviceDriver>(&self, io: &mut IO<A>, index: u64) -> Result<()> {
        trace!("Marking free: {} in bitmap at block {}", index, self.first_block);
        self.update(io, index, |byte, mask| byte & !mask)
    }

    pub fn count_free<A: DeviceDriver>(&self, io: &IO<A>) -> Result<u64> {
        let bits_per_block = io.get_block_size() as u64 * 8;
        let mut used = 0;

        for block_index in 0..self.block_count(io.get_block_size()) {
            let block = io.read_block(self.first_block + block_index)?;
            let bits_here = (self.capacity - block_index * bits_per_block).min(bits_per_block);
            let full_bytes = (bits_here / 8) as usize;
            used += block[..full_bytes].iter().map(|byte| byte.count_ones() as u64).sum::<u64>();

            let tail_bits = bits_here % 8;
            if tail_bits != 0 {
                let mask = (1u8 << tail_bits) - 1;
                used += (block[full_bytes] & mask).count_ones() as u64;
            }
        }
        Ok(self.capacity - used)
    }

    fn update<A: DeviceDriver>(&self, io: &mut IO<A>, index: u64, apply: impl Fn(u8, u8) -> u8) -> Result<()> {
        let (block_pointer, byte_index, bit_index) = self.locate(index, io.get_block_size());
        let mut block = io.read_block(block_pointer)?;
        block[byte_index] = apply(block[byte_index], 1 << bit_index);
        io.write_block(block_pointer, &block)
    }

    fn locate(&self, index: u64, block_size: usize) -> (u64, usize, usize) {
        let bits_per_block = block_size as u64 * 8;
        let block = self.first_block + index / bits_per_block;
        let in_block = index % bits_per_block;
        (block, (in_block / 8) as usize, (in_block % 8) as usize)
    }
}
