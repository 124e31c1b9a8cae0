use super::{
    error::{Diagnose, Error, Result},
    extent::BlockMap,
    storage::Storage,
    types::{FileType, Inode, Superblock},
    util, DEFAULT_BLOCK_SIZE, ROOT_INODE, SUPERBLOCK_SIZE,
};
use log::info;

/// Format-time parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    pub disk_size: u64,
    pub inode_percent: u32,
    pub block_size: u32,
}

impl FormatOptions {
    pub fn new(disk_size: u64, inode_percent: u32) -> Self {
        Self {
            disk_size,
            inode_percent,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Allocation counters next to what the bitmap and inode table really hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    pub inode_count: u32,
    pub free_inodes: u32,
    pub used_inodes: u32,
    pub data_block_count: u32,
    pub free_blocks: u32,
    pub used_blocks: u32,
}

impl Usage {
    pub fn is_consistent(&self) -> bool {
        self.free_inodes + self.used_inodes == self.inode_count
            && self.free_blocks + self.used_blocks == self.data_block_count
    }
}

/// A file system living in one backing store.
///
/// Every mutation is written through to the store before the call returns.
/// There is no locking: one caller at a time.
#[derive(Debug)]
pub struct SlateFS<S: Storage> {
    pub(crate) store: S,
    pub(crate) sb: Option<Superblock>,
}

impl<S: Storage> SlateFS<S> {
    pub fn new(store: S) -> Self {
        Self { store, sb: None }
    }

    pub fn format(&mut self, disk_size: u64, inode_percent: u32) -> Result<()> {
        self.format_with(&FormatOptions::new(disk_size, inode_percent))
    }

    /// Creates a new file system, leaving it mounted.
    pub fn format_with(&mut self, opts: &FormatOptions) -> Result<()> {
        self.format_inner(opts).diagnose("format", "disk image")
    }

    fn format_inner(&mut self, opts: &FormatOptions) -> Result<()> {
        let sb = Superblock::new(opts.disk_size, opts.inode_percent, opts.block_size)?;
        self.store.close().map_err(Error::Format)?;
        self.store.create(opts.disk_size).map_err(Error::Format)?;
        self.sb = Some(sb);

        // geometry first, so a torn format can still be inspected
        self.write_superblock()?;

        let blk_size = self.superblock()?.block_size;
        let zeroes = vec![0u8; blk_size as usize];
        for i in 0..self.superblock()?.bitmap_blocks as u64 {
            self.store
                .write_at(SUPERBLOCK_SIZE + i * blk_size as u64, &zeroes)?;
        }

        let mut root = Inode::new(FileType::Directory, "/");
        self.save_inode(&mut root, ROOT_INODE)?;
        for i in 1..self.superblock()?.inode_count {
            self.save_inode(&mut Inode::default(), i)?;
        }
        self.superblock_mut()?.free_inodes -= 1;

        for i in 0..self.superblock()?.data_block_count {
            self.write_block(i, &zeroes)?;
        }

        self.write_superblock()?;
        self.store.flush()?;

        let sb = self.superblock()?;
        info!(
            "file system formatted: {} bytes, {} inodes, {} data blocks of {} bytes",
            sb.total_size, sb.inode_count, sb.data_block_count, sb.block_size
        );

        Ok(())
    }

    pub fn mount(&mut self) -> Result<()> {
        self.mount_inner().diagnose("mount", "disk image")
    }

    fn mount_inner(&mut self) -> Result<()> {
        self.sb = None;
        self.store.close().map_err(Error::Mount)?;
        self.store.open().map_err(Error::Mount)?;

        match self.read_superblock() {
            Ok(mut sb) => {
                sb.update_last_mounted_at();
                self.sb = Some(sb);
                self.write_superblock()?;
                info!("file system mounted");
                Ok(())
            }
            Err(e) => {
                self.store.close().map_err(Error::Mount)?;
                Err(e)
            }
        }
    }

    /// Flushes and closes the store. Unmounting twice is fine.
    pub fn unmount(&mut self) -> Result<()> {
        if self.store.is_open() {
            self.store.close()?;
            info!("file system unmounted");
        }
        self.sb = None;

        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.sb.is_some()
    }

    pub fn superblock(&self) -> Result<&Superblock> {
        self.sb.as_ref().ok_or(Error::NotMounted)
    }

    pub(crate) fn superblock_mut(&mut self) -> Result<&mut Superblock> {
        self.sb.as_mut().ok_or(Error::NotMounted)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn read_superblock(&self) -> Result<Superblock> {
        let mut buf = vec![0u8; SUPERBLOCK_SIZE as usize];
        self.store.read_at(0, &mut buf).map_err(Error::Mount)?;

        let magic: u32 = bincode::deserialize(&buf[..4])?;
        let sb = Superblock::deserialize_unchecked(&buf).map_err(|_| Error::BadMagic(magic))?;
        if !sb.has_valid_magic() {
            return Err(Error::BadMagic(sb.magic));
        }

        Superblock::deserialize_from(buf.as_slice())
    }

    pub(crate) fn write_superblock(&mut self) -> Result<()> {
        let buf = self.superblock_mut()?.serialize()?;
        debug_assert!(buf.len() as u64 <= SUPERBLOCK_SIZE);
        self.store.write_at(0, &buf)?;

        Ok(())
    }

    pub(crate) fn inode_seek_position(&self, index: u32) -> Result<u64> {
        let sb = self.superblock()?;
        if index >= sb.inode_count {
            return Err(Error::InvalidInode(index));
        }

        Ok(sb.inode_table_start + index as u64 * util::inode_size() as u64)
    }

    pub(crate) fn block_seek_position(&self, index: u32) -> Result<u64> {
        let sb = self.superblock()?;
        if index >= sb.data_block_count {
            return Err(Error::InvalidBlock(index));
        }

        Ok(sb.data_region_start + index as u64 * sb.block_size as u64)
    }

    pub(crate) fn read_block(&self, index: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.superblock()?.block_size as usize];
        let offset = self.block_seek_position(index)?;
        self.store.read_at(offset, &mut buf)?;

        Ok(buf)
    }

    pub(crate) fn write_block(&mut self, index: u32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.superblock()?.block_size as usize);
        let offset = self.block_seek_position(index)?;
        self.store.write_at(offset, buf)?;

        Ok(())
    }

    /// Scans the inode table and the bitmap, reporting what is really in use
    /// next to the superblock counters.
    pub fn usage(&self) -> Result<Usage> {
        let sb = self.superblock()?;
        let mut used_inodes = 0;
        for i in 0..sb.inode_count {
            if !self.find_inode(i)?.is_free() {
                used_inodes += 1;
            }
        }

        Ok(Usage {
            inode_count: sb.inode_count,
            free_inodes: sb.free_inodes,
            used_inodes,
            data_block_count: sb.data_block_count,
            free_blocks: sb.free_blocks,
            used_blocks: self.allocated_block_count()?,
        })
    }

    /// Data blocks owned by inodes, for cross-checking the bitmap.
    pub fn owned_block_count(&self) -> Result<u32> {
        let sb = self.superblock()?;
        let mut owned = 0;
        for i in 0..sb.inode_count {
            owned += self.find_inode(i)?.owned_blocks().len() as u32;
        }

        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slate::{
        storage::{ImageFile, MemoryDisk},
        testing, SLATE_MAGIC,
    };
    use std::path::PathBuf;

    #[test]
    fn inode_seek_position() -> anyhow::Result<()> {
        let fs = testing::memory_fs()?;
        let sb = fs.superblock()?.clone();

        assert_eq!(fs.inode_seek_position(0)?, SUPERBLOCK_SIZE + 1024);
        assert_eq!(fs.inode_seek_position(1)?, SUPERBLOCK_SIZE + 1024 + 512);
        assert_eq!(
            fs.inode_seek_position(sb.inode_count - 1)?,
            sb.data_region_start - 512
        );
        assert!(matches!(
            fs.inode_seek_position(sb.inode_count),
            Err(Error::InvalidInode(_))
        ));

        assert_eq!(fs.block_seek_position(0)?, sb.data_region_start);
        assert_eq!(fs.block_seek_position(2)?, sb.data_region_start + 2048);
        assert!(matches!(
            fs.block_seek_position(sb.data_block_count),
            Err(Error::InvalidBlock(_))
        ));
        assert!(matches!(
            fs.read_block(sb.data_block_count),
            Err(Error::InvalidBlock(_))
        ));

        Ok(())
    }

    #[test]
    fn fresh_format_counters() -> anyhow::Result<()> {
        let fs = testing::memory_fs()?;
        let sb = fs.superblock()?;

        assert_eq!(sb.magic, SLATE_MAGIC);
        assert_eq!(sb.inode_count, 51);
        assert_eq!(sb.data_block_count, 228);
        assert_eq!(sb.free_inodes, sb.inode_count - 1);
        assert_eq!(sb.free_blocks, sb.data_block_count);

        let root = fs.find_inode(ROOT_INODE)?;
        assert!(root.is_dir());
        assert_eq!(root.size, 0);
        assert_eq!(root.owned_blocks(), Vec::<u32>::new());
        assert_ne!(root.created_at, 0);

        let usage = fs.usage()?;
        assert!(usage.is_consistent());
        assert_eq!(usage.used_inodes, 1);
        assert_eq!(usage.used_blocks, 0);

        Ok(())
    }

    #[test]
    fn mount_after_unmount() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let before = fs.superblock()?.clone();
        fs.unmount()?;
        fs.unmount()?;
        assert!(!fs.is_mounted());
        assert!(matches!(fs.superblock(), Err(Error::NotMounted)));

        fs.mount()?;
        let after = fs.superblock()?;
        assert_eq!(after.inode_count, before.inode_count);
        assert_eq!(after.free_blocks, before.free_blocks);
        assert!(after.last_mounted_at.is_some());

        Ok(())
    }

    #[test]
    fn mount_rejects_foreign_store() -> anyhow::Result<()> {
        let mut disk = MemoryDisk::new();
        disk.create(64 * 1024)?;
        disk.write_at(0, b"not a slate image")?;
        let mut fs = SlateFS::new(disk);

        assert!(matches!(fs.mount(), Err(Error::BadMagic(_))));
        assert!(!fs.is_mounted());
        assert!(!fs.store().is_open());

        Ok(())
    }

    #[test]
    fn mount_rejects_corrupted_superblock() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        fs.unmount()?;

        let mut disk = fs.into_store();
        disk.as_bytes_mut()[12] ^= 0x01;
        let mut fs = SlateFS::new(disk);
        assert!(matches!(fs.mount(), Err(Error::Checksum("superblock"))));

        Ok(())
    }

    #[test]
    fn mount_rejects_truncated_store() -> anyhow::Result<()> {
        let mut disk = MemoryDisk::new();
        disk.create(SUPERBLOCK_SIZE / 2)?;
        let mut fs = SlateFS::new(disk);

        assert!(matches!(fs.mount(), Err(Error::Mount(_))));
        assert!(!fs.is_mounted());
        assert!(!fs.store().is_open());

        Ok(())
    }

    #[test]
    fn mount_without_store() {
        let mut fs = SlateFS::new(MemoryDisk::new());
        assert!(matches!(fs.mount(), Err(Error::Mount(_))));
    }

    #[test]
    fn format_rejects_tiny_disk() {
        let mut fs = SlateFS::new(MemoryDisk::new());
        assert!(matches!(fs.format(2048, 10), Err(Error::Geometry(_))));
        assert!(!fs.is_mounted());
    }

    #[test]
    fn format_fails_on_unwritable_path() {
        let mut path = std::env::temp_dir();
        path.push("slatefs-missing-dir");
        path.push("nested");
        path.push("disk.img");
        let mut fs = SlateFS::new(ImageFile::new(&path));

        assert!(matches!(
            fs.format(1024 * 1024, 10),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn image_file_round_trip() -> anyhow::Result<()> {
        let tmp_file = make_image("image_file_round_trip")?;
        let mut fs = SlateFS::new(ImageFile::new(&tmp_file));
        fs.format_with(&FormatOptions {
            disk_size: 512 * 1024,
            inode_percent: 10,
            block_size: 2048,
        })?;
        fs.mkdir("/docs")?;
        let handle = fs.create("/docs/readme")?;
        fs.write(handle, 0, b"persisted")?;
        fs.unmount()?;

        let mut fs = SlateFS::new(ImageFile::new(&tmp_file));
        fs.mount()?;
        let handle = fs.open("/docs/readme")?;
        assert_eq!(fs.read(handle, 0, 64)?, b"persisted");
        assert_eq!(fs.superblock()?.block_size, 2048);
        fs.unmount()?;

        Ok(std::fs::remove_file(&tmp_file)?)
    }

    fn make_image(name: &str) -> anyhow::Result<PathBuf> {
        let mut tmp_file = std::env::temp_dir();
        tmp_file.push(name);
        tmp_file.set_extension("img");
        if tmp_file.exists() {
            std::fs::remove_file(&tmp_file)?;
        }

        Ok(tmp_file)
    }
}
