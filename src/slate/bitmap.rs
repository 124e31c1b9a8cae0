//! Free-space bitmap for the data region: one bit per data block, stored in
//! whole blocks right after the superblock.

use super::{
    error::{Diagnose, Error, Result},
    fs::SlateFS,
    storage::Storage,
    util, BITMAP_PREVIEW_BITS, SUPERBLOCK_SIZE,
};
use bitvec::{order::Lsb0, vec::BitVec};
use log::{debug, info, warn};

impl<S: Storage> SlateFS<S> {
    fn bitmap_block_position(&self, bitmap_block: u64) -> Result<u64> {
        let blk_size = self.superblock()?.block_size as u64;
        Ok(SUPERBLOCK_SIZE + bitmap_block * blk_size)
    }

    fn load_bitmap_block(&self, bitmap_block: u64) -> Result<BitVec<Lsb0, u8>> {
        let mut buf = vec![0u8; self.superblock()?.block_size as usize];
        let offset = self.bitmap_block_position(bitmap_block)?;
        self.store.read_at(offset, &mut buf)?;

        Ok(BitVec::<Lsb0, u8>::from_slice(&buf))
    }

    fn store_bitmap_block(&mut self, bitmap_block: u64, bits: &BitVec<Lsb0, u8>) -> Result<()> {
        let offset = self.bitmap_block_position(bitmap_block)?;
        self.store.write_at(offset, bits.as_slice())?;

        Ok(())
    }

    /// Sets or clears the bit of one data block, returning its previous value.
    fn update_bitmap(&mut self, index: u32, allocated: bool) -> Result<bool> {
        let blk_size = self.superblock()?.block_size;
        let (bitmap_block, byte, bit) = util::bitmap_position(index, blk_size);
        let mut bits = self.load_bitmap_block(bitmap_block)?;
        let position = byte * 8 + bit;
        let previous = bits.get(position) == Some(&true);
        bits.set(position, allocated);
        self.store_bitmap_block(bitmap_block, &bits)?;

        Ok(previous)
    }

    pub fn is_block_allocated(&self, index: u32) -> Result<bool> {
        let blk_size = self.superblock()?.block_size;
        let (bitmap_block, byte, bit) = util::bitmap_position(index, blk_size);
        let bits = self.load_bitmap_block(bitmap_block)?;

        Ok(bits.get(byte * 8 + bit) == Some(&true))
    }

    /// Takes the lowest free data block, zero-fills it and returns its index.
    pub fn allocate_data_block(&mut self) -> Result<u32> {
        let sb = self.superblock()?;
        if sb.free_blocks == 0 {
            return Err(Error::NoFreeDataBlock).diagnose("allocate", "data block");
        }

        let bits_per_block = util::bits_per_block(sb.block_size);
        let free_blocks = sb.free_blocks;
        let mut window: Option<BitVec<Lsb0, u8>> = None;
        for index in 0..sb.data_block_count {
            let position = index as u64 % bits_per_block;
            if position == 0 || window.is_none() {
                window = Some(self.load_bitmap_block(index as u64 / bits_per_block)?);
            }

            let free = window
                .as_ref()
                .map_or(false, |bits| bits.get(position as usize) == Some(&false));
            if free {
                self.update_bitmap(index, true)?;
                self.superblock_mut()?.free_blocks -= 1;
                self.write_superblock()?;

                let zeroes = vec![0u8; self.superblock()?.block_size as usize];
                self.write_block(index, &zeroes)?;
                debug!("allocated data block {}", index);

                return Ok(index);
            }
        }

        warn!(
            "bitmap and superblock disagree: no clear bit among {} blocks",
            self.superblock()?.data_block_count
        );
        Err(Error::BitmapDesync(free_blocks))
    }

    /// Returns a data block to the free pool. The caller owns the index; a
    /// block that is already free is left alone.
    pub fn free_data_block(&mut self, index: u32) -> Result<()> {
        debug_assert!(index < self.superblock()?.data_block_count);
        if !self.update_bitmap(index, false)? {
            warn!("data block {} freed twice", index);
            return Ok(());
        }

        self.superblock_mut()?.free_blocks += 1;
        self.write_superblock()?;
        debug!("freed data block {}", index);

        Ok(())
    }

    /// Number of set bits in the bitmap.
    pub fn allocated_block_count(&self) -> Result<u32> {
        let sb = self.superblock()?;
        let bits_per_block = util::bits_per_block(sb.block_size);
        let mut count = 0;
        for bitmap_block in 0..sb.bitmap_blocks as u64 {
            let bits = self.load_bitmap_block(bitmap_block)?;
            let first = bitmap_block * bits_per_block;
            let last = (first + bits_per_block).min(sb.data_block_count as u64);
            for index in first..last {
                if bits.get((index - first) as usize) == Some(&true) {
                    count += 1;
                }
            }
        }

        Ok(count)
    }

    /// Allocation state of the first data blocks, as `0`/`1` characters.
    pub fn bitmap_preview(&self) -> Result<String> {
        let count = self.superblock()?.data_block_count.min(BITMAP_PREVIEW_BITS);
        let mut preview = String::with_capacity(count as usize);
        for index in 0..count {
            preview.push(if self.is_block_allocated(index)? { '1' } else { '0' });
        }

        Ok(preview)
    }

    pub fn print_bitmap(&self) -> Result<String> {
        let preview = self.bitmap_preview()?;
        info!("bitmap status: {}", preview);

        Ok(preview)
    }
}

#[cfg(test)]
mod tests {
    use crate::slate::{error::Error, storage::Storage, testing};

    #[test]
    fn allocate_in_order() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let free = fs.superblock()?.free_blocks;

        assert_eq!(fs.allocate_data_block()?, 0);
        assert_eq!(fs.allocate_data_block()?, 1);
        assert_eq!(fs.allocate_data_block()?, 2);
        assert_eq!(fs.superblock()?.free_blocks, free - 3);
        assert_eq!(fs.bitmap_preview()?, "1110000000");

        fs.free_data_block(1)?;
        assert_eq!(fs.superblock()?.free_blocks, free - 2);
        assert!(!fs.is_block_allocated(1)?);
        assert_eq!(fs.print_bitmap()?, "1010000000");

        assert_eq!(fs.allocate_data_block()?, 1);
        assert_eq!(fs.allocated_block_count()?, 3);

        Ok(())
    }

    #[test]
    fn double_free_keeps_counter() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let free = fs.superblock()?.free_blocks;
        let block = fs.allocate_data_block()?;

        fs.free_data_block(block)?;
        fs.free_data_block(block)?;
        assert_eq!(fs.superblock()?.free_blocks, free);

        Ok(())
    }

    #[test]
    fn allocated_blocks_are_zeroed() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let block = fs.allocate_data_block()?;
        let dirty = vec![0xabu8; fs.superblock()?.block_size as usize];
        fs.write_block(block, &dirty)?;
        fs.free_data_block(block)?;

        assert_eq!(fs.allocate_data_block()?, block);
        assert!(fs.read_block(block)?.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn exhaustion_and_desync() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let count = fs.superblock()?.data_block_count;
        for expected in 0..count {
            assert_eq!(fs.allocate_data_block()?, expected);
        }
        assert_eq!(fs.superblock()?.free_blocks, 0);
        assert!(matches!(
            fs.allocate_data_block(),
            Err(Error::NoFreeDataBlock)
        ));

        // a counter that claims free space the bitmap does not have
        fs.superblock_mut()?.free_blocks = 5;
        assert!(matches!(
            fs.allocate_data_block(),
            Err(Error::BitmapDesync(5))
        ));

        Ok(())
    }

    #[test]
    fn bitmap_bits_are_lsb_first() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        for _ in 0..10 {
            fs.allocate_data_block()?;
        }
        fs.free_data_block(3)?;

        let mut buf = [0u8; 2];
        fs.store.read_at(crate::slate::SUPERBLOCK_SIZE, &mut buf)?;
        assert_eq!(buf, [0b1111_0111, 0b0000_0011]);

        Ok(())
    }
}
