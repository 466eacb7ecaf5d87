use crate::driver::DeviceDriver;
use crate::util::error::{Error, Result};
use raw::{raw_read_block, raw_write_block};

mod raw;

/// Block-granular access to a sector device. Nothing is cached.
pub struct IO<A: DeviceDriver> {
    device: A,
    block_size: usize,
    block_count: u64,
}

impl<A: DeviceDriver> IO<A> {
    pub fn new(device: A, block_size: usize) -> Result<IO<A>> {
        let sector_size = device.get_sector_size();
        if block_size < sector_size || block_size % sector_size != 0 {
            return Err(Error::InvalidImage(format!(
                "block size {} is not a multiple of sector size {}",
                block_size, sector_size
            )));
        }

        let block_count = device.get_size() / block_size as u64;
        Ok(IO { device, block_size, block_count })
    }

    #[inline]
    pub fn get_block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn get_block_count(&self) -> u64 {
        self.block_count
    }

    pub(crate) fn write_block(&mut self, index: u64, block: &[u8]) -> Result<()> {
        if block.len() != self.block_size {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("block size mismatch - expected {}, got {}", self.block_size, block.len()),
            )));
        }

        if index >= self.block_count {
            return Err(Error::BlockOutOfRange(index));
        }

        Ok(raw_write_block(&mut self.device, self.block_size, block, index)?)
    }

    pub(crate) fn read_block(&self, index: u64) -> Result<Vec<u8>> {
        if index >= self.block_count {
            return Err(Error::BlockOutOfRange(index));
        }

        Ok(raw_read_block(&self.device, self.block_size, index)?)
    }

    pub(crate) fn zero_block(&mut self, index: u64) -> Result<()> {
        let zeros = vec![0u8; self.block_size];
        self.write_block(index, &zeros)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        Ok(self.device.flush()?)
    }
}
