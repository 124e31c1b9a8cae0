use log::warn;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to create disk image: {0}")]
    Format(#[source] io::Error),
    #[error("invalid geometry: {0}")]
    Geometry(String),
    #[error("unable to open disk image: {0}")]
    Mount(#[source] io::Error),
    #[error("invalid file system format (magic {0:#x})")]
    BadMagic(u32),
    #[error("{0} checksum verification failed")]
    Checksum(&'static str),
    #[error("file system is not mounted")]
    NotMounted,
    #[error("{name} not found in {parent}")]
    PathNotFound { name: String, parent: String },
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("{0} is not a regular file")]
    NotAFile(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("directory {0} is not empty")]
    DirectoryNotEmpty(String),
    #[error("parent directory is full")]
    DirectoryFull,
    #[error("no free inode available")]
    NoFreeInode,
    #[error("no free data block available")]
    NoFreeDataBlock,
    #[error("file name is {0} bytes long, the limit is {}", crate::slate::MAX_FILENAME_LEN)]
    FilenameTooLong(usize),
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("{0} has no parent directory")]
    NoParent(String),
    #[error("inode {0} is out of range")]
    InvalidInode(u32),
    #[error("data block {0} is out of range")]
    InvalidBlock(u32),
    #[error("offset {offset} out of range for a file of {size} bytes")]
    OffsetOutOfRange { offset: u64, size: u64 },
    #[error("block {0} needs indirect addressing, which is not supported")]
    UnsupportedBlockIndex(usize),
    #[error("data block {0} of the file is not allocated")]
    BlockNotAllocated(usize),
    #[error("inode {child} has no entry in directory inode {parent}")]
    MissingEntry { parent: u32, child: u32 },
    #[error("bitmap has no clear bit although {0} blocks are counted free")]
    BitmapDesync(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) trait Diagnose {
    /// Logs the failure of `op` on `subject`, passing the result through.
    fn diagnose(self, op: &str, subject: &str) -> Self;
}

impl<T> Diagnose for Result<T> {
    fn diagnose(self, op: &str, subject: &str) -> Self {
        if let Err(e) = &self {
            warn!("{} {}: {}", op, subject, e);
        }
        self
    }
}
