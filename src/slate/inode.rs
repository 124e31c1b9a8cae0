use super::{
    error::{Diagnose, Error, Result},
    extent::BlockMap,
    fs::SlateFS,
    storage::Storage,
    types::{FileType, Inode},
    util, ROOT_INODE,
};
use log::{debug, warn};

impl<S: Storage> SlateFS<S> {
    pub fn find_inode(&self, index: u32) -> Result<Inode> {
        let offset = self.inode_seek_position(index)?;
        let mut buf = vec![0u8; util::inode_size() as usize];
        self.store.read_at(offset, &mut buf)?;

        Inode::deserialize_from(buf.as_slice())
    }

    pub(crate) fn save_inode(&mut self, inode: &mut Inode, index: u32) -> Result<()> {
        let offset = self.inode_seek_position(index)?;
        let buf = inode.serialize()?;
        self.store.write_at(offset, &buf)?;

        Ok(())
    }

    /// Claims the first free slot after the root for an inode of `kind`.
    pub fn allocate_inode(&mut self, kind: FileType) -> Result<u32> {
        let sb = self.superblock()?;
        if sb.free_inodes == 0 {
            return Err(Error::NoFreeInode).diagnose("allocate", "inode");
        }

        for index in ROOT_INODE + 1..sb.inode_count {
            let mut inode = self.find_inode(index)?;
            if inode.is_free() {
                inode = Inode::new(kind, "");
                self.save_inode(&mut inode, index)?;
                self.superblock_mut()?.free_inodes -= 1;
                self.write_superblock()?;
                debug!("allocated inode {} as {:?}", index, kind);

                return Ok(index);
            }
        }

        warn!(
            "{} inodes counted free but none found in the table",
            self.superblock()?.free_inodes
        );
        Err(Error::NoFreeInode)
    }

    /// Releases an inode and every data block it owns.
    pub fn free_inode(&mut self, index: u32) -> Result<()> {
        if index == ROOT_INODE {
            return Err(Error::InvalidInode(index));
        }

        let inode = self.find_inode(index)?;
        if inode.is_free() {
            warn!("inode {} freed twice", index);
            return Ok(());
        }
        for block in inode.owned_blocks() {
            self.free_data_block(block)?;
        }
        if inode.indirect_block != 0 {
            // only the direct table is ever populated
            warn!("inode {} has an indirect block that is not released", index);
        }

        self.save_inode(&mut Inode::default(), index)?;
        self.superblock_mut()?.free_inodes += 1;
        self.write_superblock()?;
        debug!("freed inode {}", index);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slate::testing;

    #[test]
    fn allocate_skips_root() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let free = fs.superblock()?.free_inodes;

        let index = fs.allocate_inode(FileType::RegularFile)?;
        assert_eq!(index, 1);
        assert_eq!(fs.superblock()?.free_inodes, free - 1);
        assert_eq!(fs.find_inode(index)?.kind(), Some(FileType::RegularFile));

        assert_eq!(fs.allocate_inode(FileType::Directory)?, 2);
        assert!(fs.find_inode(2)?.is_dir());

        Ok(())
    }

    #[test]
    fn free_releases_blocks() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let free_blocks = fs.superblock()?.free_blocks;
        let free_inodes = fs.superblock()?.free_inodes;

        let index = fs.allocate_inode(FileType::RegularFile)?;
        let mut inode = fs.find_inode(index)?;
        inode.set_block(0, Some(fs.allocate_data_block()?))?;
        inode.set_block(4, Some(fs.allocate_data_block()?))?;
        inode.size = 5000;
        fs.save_inode(&mut inode, index)?;
        assert_eq!(fs.superblock()?.free_blocks, free_blocks - 2);

        fs.free_inode(index)?;
        assert_eq!(fs.superblock()?.free_blocks, free_blocks);
        assert_eq!(fs.superblock()?.free_inodes, free_inodes);
        let freed = fs.find_inode(index)?;
        assert!(freed.is_free());
        assert_eq!(freed.size, 0);
        assert!(freed.owned_blocks().is_empty());

        fs.free_inode(index)?;
        assert_eq!(fs.superblock()?.free_inodes, free_inodes);

        Ok(())
    }

    #[test]
    fn freed_directory_slot_is_reused() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let dir = fs.allocate_inode(FileType::Directory)?;
        fs.free_inode(dir)?;

        let file = fs.allocate_inode(FileType::RegularFile)?;
        assert_eq!(file, dir);
        assert!(fs.find_inode(file)?.is_file());

        Ok(())
    }

    #[test]
    fn root_is_never_freed() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        assert!(matches!(
            fs.free_inode(ROOT_INODE),
            Err(Error::InvalidInode(0))
        ));
        assert!(fs.find_inode(ROOT_INODE)?.is_dir());

        Ok(())
    }

    #[test]
    fn inode_table_exhaustion() -> anyhow::Result<()> {
        let mut fs = testing::memory_fs()?;
        let count = fs.superblock()?.inode_count;
        for expected in 1..count {
            assert_eq!(fs.allocate_inode(FileType::RegularFile)?, expected);
        }
        assert!(matches!(
            fs.allocate_inode(FileType::RegularFile),
            Err(Error::NoFreeInode)
        ));

        Ok(())
    }
}
