//! Random-access byte stores a file system image can live in.

use memmap::MmapMut;
use std::{
    fs::OpenOptions,
    io,
    ops::Range,
    path::{Path, PathBuf},
};

/// A byte-addressable container backing one file system image.
///
/// Implementations do no buffering of their own beyond what `flush` pushes
/// out; the file system persists every mutation as soon as it makes it.
pub trait Storage {
    /// Opens the store, creating it if needed, and sets its length to `len`
    /// bytes. Existing content is discarded.
    fn create(&mut self, len: u64) -> io::Result<()>;

    /// Opens an existing store.
    fn open(&mut self) -> io::Result<()>;

    /// Flushes and closes the store. Closing a closed store is a no-op.
    fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

fn region(store_len: usize, offset: u64, len: usize) -> io::Result<Range<usize>> {
    let start = offset as usize;
    match start.checked_add(len) {
        Some(end) if end <= store_len => Ok(start..end),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "access of {} bytes at offset {} past the end of a {} byte store",
                len, offset, store_len
            ),
        )),
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "disk image is not open")
}

/// A disk image file, memory mapped while open.
#[derive(Debug)]
pub struct ImageFile {
    path: PathBuf,
    mmap: Option<MmapMut>,
}

impl ImageFile {
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            path: PathBuf::from(path.as_ref()),
            mmap: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map(&mut self, create: bool, len: u64) -> io::Result<()> {
        self.close()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(create)
            .open(&self.path)?;
        if create {
            file.set_len(len)?;
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        self.mmap = Some(mmap);

        Ok(())
    }
}

impl Storage for ImageFile {
    fn create(&mut self, len: u64) -> io::Result<()> {
        self.map(true, len)
    }

    fn open(&mut self) -> io::Result<()> {
        self.map(false, 0)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.mmap.is_some()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mmap = self.mmap.as_ref().ok_or_else(not_open)?;
        let range = region(mmap.len(), offset, buf.len())?;
        buf.copy_from_slice(&mmap[range]);

        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mmap = self.mmap.as_mut().ok_or_else(not_open)?;
        let range = region(mmap.len(), offset, buf.len())?;
        mmap[range].copy_from_slice(buf);

        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.mmap.as_ref() {
            Some(mmap) => mmap.flush(),
            None => Err(not_open()),
        }
    }
}

/// An in-memory store. Its bytes survive `close`, so an image can be
/// unmounted and mounted again.
#[derive(Debug, Default)]
pub struct MemoryDisk {
    bytes: Vec<u8>,
    open: bool,
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Storage for MemoryDisk {
    fn create(&mut self, len: u64) -> io::Result<()> {
        self.bytes = vec![0u8; len as usize];
        self.open = true;

        Ok(())
    }

    fn open(&mut self) -> io::Result<()> {
        if self.bytes.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "memory disk was never created",
            ));
        }
        self.open = true;

        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if !self.open {
            return Err(not_open());
        }
        let range = region(self.bytes.len(), offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);

        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if !self.open {
            return Err(not_open());
        }
        let range = region(self.bytes.len(), offset, buf.len())?;
        self.bytes[range].copy_from_slice(buf);

        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(not_open())
        }
    }
}
