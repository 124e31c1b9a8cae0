//! Mapping from a file's logical block numbers to data blocks.

use super::{
    error::{Error, Result},
    types::Inode,
    DIRECT_BLOCKS,
};

/// Resolves logical block numbers of one file or directory.
///
/// Only the direct table exists today. Logical blocks beyond it are reported
/// as `UnsupportedBlockIndex` so callers fail cleanly instead of truncating.
pub trait BlockMap {
    /// Number of logical blocks this map can address.
    fn capacity(&self) -> usize;

    fn block(&self, logical: usize) -> Result<Option<u32>>;

    fn set_block(&mut self, logical: usize, block: Option<u32>) -> Result<()>;

    /// Every data block currently owned.
    fn owned_blocks(&self) -> Vec<u32> {
        (0..self.capacity())
            .filter_map(|logical| self.block(logical).ok().flatten())
            .collect()
    }
}

impl BlockMap for Inode {
    fn capacity(&self) -> usize {
        DIRECT_BLOCKS
    }

    fn block(&self, logical: usize) -> Result<Option<u32>> {
        match self.direct_blocks.get(logical) {
            Some(0) => Ok(None),
            Some(ptr) => Ok(Some(ptr - 1)),
            None => Err(Error::UnsupportedBlockIndex(logical)),
        }
    }

    fn set_block(&mut self, logical: usize, block: Option<u32>) -> Result<()> {
        let slot = self
            .direct_blocks
            .get_mut(logical)
            .ok_or(Error::UnsupportedBlockIndex(logical))?;
        *slot = block.map_or(0, |b| b + 1);

        Ok(())
    }
}

/// Checks that every logical block in `first..=last` is addressable.
pub fn check_range<M: BlockMap>(map: &M, first: usize, last: usize) -> Result<()> {
    if last >= map.capacity() {
        return Err(Error::UnsupportedBlockIndex(first.max(map.capacity())));
    }

    Ok(())
}
