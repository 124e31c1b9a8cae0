use super::types::{DirEntry, FileType, Inode};
use std::time::{self, SystemTime};

pub fn calculate_checksum<S>(s: &S) -> u32
where
    S: serde::Serialize,
{
    let mut hasher = crc32fast::Hasher::new();
    // serializing plain structs into a Vec cannot fail
    hasher.update(&bincode::serialize(&s).unwrap_or_default());
    hasher.finalize()
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Size of one inode table slot: the encoded size of the largest inode
/// variant, rounded up to a power of two.
pub fn inode_size() -> u32 {
    let inode = Inode::new(FileType::Directory, "");
    let serialized_size = bincode::serialized_size(&inode).unwrap_or(0);
    serialized_size.next_power_of_two() as u32
}

pub fn dir_entry_size() -> usize {
    bincode::serialized_size(&DirEntry::default()).unwrap_or(0) as usize
}

pub fn entries_per_block(blk_size: u32) -> usize {
    blk_size as usize / dir_entry_size()
}

pub fn bits_per_block(blk_size: u32) -> u64 {
    blk_size as u64 * 8
}

/// Number of whole blocks needed to hold one bit per data block.
pub fn bitmap_blocks(data_blocks: u64, blk_size: u32) -> u64 {
    let bytes = (data_blocks + 7) / 8;
    (bytes + blk_size as u64 - 1) / blk_size as u64
}

/// (bitmap block, byte within block, bit within byte) of a data block.
pub fn bitmap_position(index: u32, blk_size: u32) -> (u64, usize, usize) {
    let bits = bits_per_block(blk_size);
    let index = index as u64;
    let bit_index = index % bits;
    (index / bits, (bit_index / 8) as usize, (index % 8) as usize)
}
