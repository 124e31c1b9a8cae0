pub mod bitmap;
pub mod dir;
pub mod error;
pub mod extent;
pub mod file;
pub mod fs;
pub mod inode;
pub mod path;
pub mod storage;
pub mod types;
pub mod util;

const SLATE_MAGIC: u32 = 0x534c_4154;
pub const SUPERBLOCK_SIZE: u64 = 1024;
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;
pub const ROOT_INODE: u32 = 0;
pub const DIRECT_BLOCKS: usize = 10;
pub const MAX_FILENAME_LEN: usize = 255;
pub const NAME_FIELD_LEN: usize = MAX_FILENAME_LEN + 1;
pub const BITMAP_PREVIEW_BITS: u32 = 10;
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

#[cfg(test)]
pub(crate) mod testing {
    use super::{fs::SlateFS, storage::MemoryDisk};

    pub const TEST_DISK_SIZE: u64 = 256 * 1024;
    pub const TEST_BLOCK_SIZE: u32 = 1024;

    /// A freshly formatted 256 KiB file system with 1 KiB blocks.
    pub fn memory_fs() -> anyhow::Result<SlateFS<MemoryDisk>> {
        let mut fs = SlateFS::new(MemoryDisk::new());
        fs.format_with(&super::fs::FormatOptions {
            disk_size: TEST_DISK_SIZE,
            inode_percent: 10,
            block_size: TEST_BLOCK_SIZE,
        })?;

        Ok(fs)
    }
}
