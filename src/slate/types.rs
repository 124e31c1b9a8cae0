use super::{
    error::{Error, Result},
    util, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DIRECT_BLOCKS, MAX_FILENAME_LEN, NAME_FIELD_LEN,
    SLATE_MAGIC, SUPERBLOCK_SIZE,
};
use serde::{
    de::{self, SeqAccess, Visitor},
    ser::SerializeTuple,
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{
    borrow::Cow,
    fmt,
    io::Read,
};

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Superblock {
    pub magic: u32,
    pub total_size: u64,
    pub block_size: u32,
    pub inode_count: u32,
    pub data_block_count: u32,
    pub bitmap_blocks: u32,
    pub inode_table_start: u64,
    pub data_region_start: u64,
    pub free_inodes: u32,
    pub free_blocks: u32,
    pub created_at: u64,
    pub last_mounted_at: Option<u64>,
    pub checksum: u32,
}

impl Superblock {
    /// Lays out a disk of `disk_size` bytes: superblock, bitmap, inode table
    /// and data region, in that order. Every inode and block starts free.
    pub fn new(disk_size: u64, inode_percent: u32, block_size: u32) -> Result<Self> {
        Self::check_settings(inode_percent, block_size)?;

        let inode_size = util::inode_size() as u64;
        let inode_count = disk_size * inode_percent as u64 / (100 * inode_size);
        if inode_count == 0 || inode_count > u32::MAX as u64 {
            return Err(Error::Geometry(format!(
                "{} bytes at {}% give {} inodes",
                disk_size, inode_percent, inode_count
            )));
        }

        let inode_table_size = inode_count * inode_size;
        let estimate = disk_size
            .saturating_sub(SUPERBLOCK_SIZE + inode_table_size)
            / block_size as u64;
        let bitmap_blocks = util::bitmap_blocks(estimate, block_size);
        let inode_table_start = SUPERBLOCK_SIZE + bitmap_blocks * block_size as u64;
        let data_region_start = inode_table_start + inode_table_size;
        let data_block_count = disk_size.saturating_sub(data_region_start) / block_size as u64;
        if data_block_count == 0 || data_block_count > u32::MAX as u64 {
            return Err(Error::Geometry(format!(
                "{} bytes leave {} data blocks of {} bytes",
                disk_size, data_block_count, block_size
            )));
        }

        Ok(Self {
            magic: SLATE_MAGIC,
            total_size: disk_size,
            block_size,
            inode_count: inode_count as u32,
            data_block_count: data_block_count as u32,
            bitmap_blocks: bitmap_blocks as u32,
            inode_table_start,
            data_region_start,
            free_inodes: inode_count as u32,
            free_blocks: data_block_count as u32,
            created_at: util::now(),
            last_mounted_at: None,
            checksum: 0,
        })
    }

    /// Validates the format settings that do not depend on the disk size.
    pub fn check_settings(inode_percent: u32, block_size: u32) -> Result<()> {
        if !block_size.is_power_of_two() || block_size < 512 {
            return Err(Error::Geometry(format!(
                "block size {} is not a power of two of at least 512",
                block_size
            )));
        }
        if inode_percent == 0 || inode_percent > 100 {
            return Err(Error::Geometry(format!(
                "inode percentage {} is not between 1 and 100",
                inode_percent
            )));
        }

        Ok(())
    }

    pub fn update_last_mounted_at(&mut self) {
        self.last_mounted_at = Some(util::now());
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == SLATE_MAGIC
    }

    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        self.checksum();
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a superblock without looking at its magic or checksum; the
    /// caller decides which one to trust first.
    pub fn deserialize_unchecked(buf: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(buf)?)
    }

    pub fn deserialize_from<R>(r: R) -> Result<Self>
    where
        R: Read,
    {
        let mut sb: Self = bincode::deserialize_from(r)?;
        if !sb.verify_checksum() {
            return Err(Error::Checksum("superblock"));
        }

        Ok(sb)
    }

    fn checksum(&mut self) {
        self.checksum = 0;
        self.checksum = util::calculate_checksum(&self);
    }

    pub fn verify_checksum(&mut self) -> bool {
        let checksum = self.checksum;
        self.checksum = 0;
        let ok = checksum == util::calculate_checksum(&self);
        self.checksum = checksum;

        ok
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    RegularFile,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Directory => write!(f, "d"),
            FileType::RegularFile => write!(f, "-"),
        }
    }
}

/// Allocation state of an inode slot, stored explicitly rather than guessed
/// from the other fields.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeState {
    Free,
    InUse(FileType),
}

impl Default for InodeState {
    fn default() -> Self {
        InodeState::Free
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Inode {
    pub state: InodeState,
    pub size: u64,
    pub mode: u32,
    pub created_at: u64,
    pub modified_at: u64,
    pub accessed_at: u64,
    // block index + 1, 0 when unallocated
    pub direct_blocks: [u32; DIRECT_BLOCKS],
    pub indirect_block: u32,
    pub label: FixedName<NAME_FIELD_LEN>,
    pub checksum: u32,
}

impl Inode {
    /// A fresh in-use inode labelled with the path it was created at.
    pub fn new(kind: FileType, label: &str) -> Self {
        let now = util::now();
        Self {
            state: InodeState::InUse(kind),
            mode: match kind {
                FileType::Directory => DEFAULT_DIR_MODE,
                FileType::RegularFile => DEFAULT_FILE_MODE,
            },
            created_at: now,
            modified_at: now,
            accessed_at: now,
            label: FixedName::truncated(label),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> Option<FileType> {
        match self.state {
            InodeState::Free => None,
            InodeState::InUse(kind) => Some(kind),
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == InodeState::Free
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Some(FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.kind() == Some(FileType::RegularFile)
    }

    pub fn touch_accessed(&mut self) {
        self.accessed_at = util::now();
    }

    pub fn touch_modified(&mut self) {
        self.modified_at = util::now();
    }

    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        self.checksum();
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize_from<R: Read>(r: R) -> Result<Self> {
        let mut inode: Self = bincode::deserialize_from(r)?;
        if !inode.verify_checksum() {
            return Err(Error::Checksum("inode"));
        }

        Ok(inode)
    }

    fn checksum(&mut self) {
        self.checksum = 0;
        self.checksum = util::calculate_checksum(&self);
    }

    fn verify_checksum(&mut self) -> bool {
        let checksum = self.checksum;
        self.checksum = 0;
        let ok = checksum == util::calculate_checksum(&self);
        self.checksum = checksum;

        ok
    }
}

/// One slot of a directory block. An inode index of 0 marks the slot empty;
/// the root can never be a child, so 0 is never a real target.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct DirEntry {
    pub name: FixedName<NAME_FIELD_LEN>,
    pub inode: u32,
}

impl DirEntry {
    pub fn new(name: &str, inode: u32) -> Result<Self> {
        Ok(Self {
            name: FixedName::new(name)?,
            inode,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inode == 0
    }
}

/// A zero-padded byte string of fixed capacity `N`, encoded as exactly `N`
/// bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedName<const N: usize>([u8; N]);

impl<const N: usize> FixedName<N> {
    /// Fails when `name` does not fit with its terminating zero, or holds a
    /// zero byte of its own.
    pub fn new(name: &str) -> Result<Self> {
        if name.len() >= N {
            return Err(Error::FilenameTooLong(name.len()));
        }
        if name.contains('\0') {
            return Err(Error::InvalidPath(name.to_string()));
        }
        let mut bytes = [0u8; N];
        bytes[..name.len()].copy_from_slice(name.as_bytes());

        Ok(Self(bytes))
    }

    /// Keeps the longest prefix of `s` that fits, cut at a char boundary.
    pub fn truncated(s: &str) -> Self {
        let mut end = s.len().min(N - 1);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; N];
        bytes[..end].copy_from_slice(&s.as_bytes()[..end]);

        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        &self.0[..len]
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.as_bytes() == name.as_bytes()
    }
}

impl<const N: usize> Default for FixedName<N> {
    fn default() -> Self {
        Self([0u8; N])
    }
}

impl<const N: usize> fmt::Debug for FixedName<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> Serialize for FixedName<N> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(N)?;
        for byte in self.0.iter() {
            tuple.serialize_element(byte)?;
        }
        tuple.end()
    }
}

impl<'de, const N: usize> Deserialize<'de> for FixedName<N> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NameVisitor<const N: usize>;

        impl<'de, const N: usize> Visitor<'de> for NameVisitor<N> {
            type Value = FixedName<N>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} name bytes", N)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut bytes = [0u8; N];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }

                Ok(FixedName(bytes))
            }
        }

        deserializer.deserialize_tuple(N, NameVisitor::<N>)
    }
}

const _: () = assert!(MAX_FILENAME_LEN < NAME_FIELD_LEN);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slate::DEFAULT_BLOCK_SIZE;

    #[test]
    fn superblock_new() -> anyhow::Result<()> {
        let sb = Superblock::new(100 * 1024 * 1024, 10, DEFAULT_BLOCK_SIZE)?;
        assert_eq!(sb.inode_count, 20480);
        assert_eq!(sb.bitmap_blocks, 1);
        assert_eq!(sb.inode_table_start, SUPERBLOCK_SIZE + 4096);
        assert_eq!(sb.data_region_start, sb.inode_table_start + 20480 * 512);
        assert_eq!(sb.data_block_count, 23038);
        assert_eq!(sb.free_inodes, sb.inode_count);
        assert_eq!(sb.free_blocks, sb.data_block_count);
        assert!(
            sb.data_region_start + sb.data_block_count as u64 * 4096 <= sb.total_size,
            "data region overflows the disk"
        );

        Ok(())
    }

    #[test]
    fn superblock_rejects_bad_geometry() {
        assert!(matches!(
            Superblock::new(1 << 20, 10, 1000),
            Err(Error::Geometry(_))
        ));
        assert!(matches!(
            Superblock::new(1 << 20, 0, 4096),
            Err(Error::Geometry(_))
        ));
        assert!(matches!(
            Superblock::new(4096, 10, 4096),
            Err(Error::Geometry(_))
        ));
        assert!(Superblock::check_settings(100, 1024).is_ok());
        assert!(Superblock::check_settings(101, 1024).is_err());
        assert!(Superblock::check_settings(10, 256).is_err());
    }

    #[test]
    fn superblock_checksum() -> anyhow::Result<()> {
        let mut sb = Superblock::new(1 << 20, 10, 1024)?;
        let buf = Superblock::serialize(&mut sb)?;
        let mut deserialised_sb = Superblock::deserialize_from(buf.as_slice())?;
        assert_ne!(deserialised_sb.checksum, 0);
        assert_eq!(deserialised_sb.checksum, sb.checksum);

        deserialised_sb.free_blocks -= 1;
        let buf = Superblock::serialize(&mut deserialised_sb)?;
        let deserialised_sb = Superblock::deserialize_from(buf.as_slice())?;
        assert_ne!(sb.checksum, deserialised_sb.checksum);

        let mut corrupted = Superblock::serialize(&mut sb)?;
        corrupted[8] ^= 0xff;
        assert!(matches!(
            Superblock::deserialize_from(corrupted.as_slice()),
            Err(Error::Checksum("superblock"))
        ));

        Ok(())
    }

    #[test]
    fn inode_checksum() -> anyhow::Result<()> {
        let mut inode = Inode::new(FileType::RegularFile, "/a/f.txt");
        inode.size = 24;
        let buf = Inode::serialize(&mut inode)?;
        let mut deserialised_inode = Inode::deserialize_from(buf.as_slice())?;
        assert_eq!(deserialised_inode, inode);

        deserialised_inode.accessed_at += 1;
        let buf = Inode::serialize(&mut deserialised_inode)?;
        let deserialised_inode = Inode::deserialize_from(buf.as_slice())?;
        assert_ne!(inode.checksum, deserialised_inode.checksum);

        Ok(())
    }

    #[test]
    fn inode_records_are_fixed_size() -> anyhow::Result<()> {
        let mut free = Inode::default();
        let mut used = Inode::new(FileType::Directory, &"x".repeat(400));
        assert!(Inode::serialize(&mut free)?.len() <= util::inode_size() as usize);
        assert!(Inode::serialize(&mut used)?.len() <= util::inode_size() as usize);
        assert_eq!(used.label.as_bytes().len(), MAX_FILENAME_LEN);

        Ok(())
    }

    #[test]
    fn dir_entry_layout() -> anyhow::Result<()> {
        let entry = DirEntry::new("f.txt", 7)?;
        let buf = bincode::serialize(&entry)?;
        assert_eq!(buf.len(), util::dir_entry_size());
        assert_eq!(&buf[..5], b"f.txt");
        assert!(buf[5..NAME_FIELD_LEN].iter().all(|&b| b == 0));
        assert_eq!(&buf[NAME_FIELD_LEN..], &7u32.to_le_bytes());

        let decoded: DirEntry = bincode::deserialize(&buf)?;
        assert!(decoded.name.matches("f.txt"));
        assert!(!decoded.name.matches("f.tx"));
        assert!(!decoded.is_empty());

        Ok(())
    }

    #[test]
    fn file_name_limits() {
        assert!(DirEntry::new(&"n".repeat(MAX_FILENAME_LEN), 1).is_ok());
        assert!(matches!(
            DirEntry::new(&"n".repeat(MAX_FILENAME_LEN + 1), 1),
            Err(Error::FilenameTooLong(256))
        ));

        assert!(matches!(
            FixedName::<8>::new("a\0x"),
            Err(Error::InvalidPath(_))
        ));

        let label = FixedName::<4>::truncated("aé");
        assert_eq!(label.as_str(), "aé");
        let label = FixedName::<3>::truncated("aé");
        assert_eq!(label.as_str(), "a");
    }
}
