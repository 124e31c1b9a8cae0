//! Byte-addressed reads and writes over a file's direct blocks.
//!
//! The handle of an open file is its inode index.

use super::{
    error::{Diagnose, Error, Result},
    extent::{self, BlockMap},
    fs::SlateFS,
    storage::Storage,
    types::Inode,
};
use log::debug;

/// Logical blocks touched by the byte range `offset..end`, inclusive.
fn block_range(offset: u64, end: u64, blk_size: u64) -> (usize, usize) {
    ((offset / blk_size) as usize, ((end - 1) / blk_size) as usize)
}

/// The part of `offset..end` that falls inside logical block `logical`, as
/// offsets within that block.
fn span_in_block(logical: usize, offset: u64, end: u64, blk_size: u64) -> (usize, usize) {
    let block_start = logical as u64 * blk_size;
    let from = offset.max(block_start) - block_start;
    let to = end.min(block_start + blk_size) - block_start;

    (from as usize, to as usize)
}

impl<S: Storage> SlateFS<S> {
    fn file_inode(&self, handle: u32) -> Result<Inode> {
        let inode = self.find_inode(handle)?;
        if !inode.is_file() {
            return Err(Error::NotAFile(format!("inode {}", handle)));
        }

        Ok(inode)
    }

    /// Opens a regular file, returning its handle.
    pub fn open(&mut self, path: &str) -> Result<u32> {
        self.open_inner(path).diagnose("open", path)
    }

    fn open_inner(&mut self, path: &str) -> Result<u32> {
        let handle = self.lookup(path)?;
        let mut inode = self.find_inode(handle)?;
        if !inode.is_file() {
            return Err(Error::NotAFile(path.to_string()));
        }
        inode.touch_accessed();
        self.save_inode(&mut inode, handle)?;

        Ok(handle)
    }

    /// Reads up to `length` bytes starting at `offset`. The offset must lie
    /// inside the file; the length is clamped to its end.
    pub fn read(&mut self, handle: u32, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.read_inner(handle, offset, length)
            .diagnose("read", &format!("inode {}", handle))
    }

    fn read_inner(&mut self, handle: u32, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut inode = self.file_inode(handle)?;
        if offset >= inode.size {
            return Err(Error::OffsetOutOfRange {
                offset,
                size: inode.size,
            });
        }

        let length = (length as u64).min(inode.size - offset);
        if length == 0 {
            return Ok(Vec::new());
        }

        let blk_size = self.superblock()?.block_size as u64;
        let end = offset + length;
        let (first, last) = block_range(offset, end, blk_size);
        extent::check_range(&inode, first, last)?;

        let mut out = Vec::with_capacity(length as usize);
        for logical in first..=last {
            let block = inode
                .block(logical)?
                .ok_or(Error::BlockNotAllocated(logical))?;
            let buf = self.read_block(block)?;
            let (from, to) = span_in_block(logical, offset, end, blk_size);
            out.extend_from_slice(&buf[from..to]);
        }

        inode.touch_accessed();
        self.save_inode(&mut inode, handle)?;

        Ok(out)
    }

    /// Reads the whole file.
    pub fn read_all(&mut self, handle: u32) -> Result<Vec<u8>> {
        let size = self
            .file_inode(handle)
            .diagnose("read", &format!("inode {}", handle))?
            .size;
        if size == 0 {
            return Ok(Vec::new());
        }

        self.read(handle, 0, size as usize)
    }

    /// Writes `data` at `offset`, allocating blocks as needed, and returns
    /// the number of bytes written.
    ///
    /// Writing past the end of the file zero-fills the gap, so every offset
    /// below the file size stays readable.
    pub fn write(&mut self, handle: u32, offset: u64, data: &[u8]) -> Result<usize> {
        self.write_inner(handle, offset, data)
            .diagnose("write", &format!("inode {}", handle))
    }

    fn write_inner(&mut self, handle: u32, offset: u64, data: &[u8]) -> Result<usize> {
        let mut inode = self.file_inode(handle)?;
        if data.is_empty() {
            return Ok(0);
        }

        let blk_size = self.superblock()?.block_size as u64;
        // a range ending past u64::MAX is far beyond the direct blocks
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(Error::UnsupportedBlockIndex((offset / blk_size) as usize))?;
        let (first, last) = block_range(offset, end, blk_size);
        extent::check_range(&inode, first, last)?;

        let fill_from = first.min((inode.size / blk_size) as usize);
        let mut grown = false;
        let mut allocated = Ok(());
        for logical in fill_from..=last {
            if inode.block(logical)?.is_some() {
                continue;
            }
            match self.allocate_data_block() {
                Ok(block) => {
                    inode.set_block(logical, Some(block))?;
                    grown = true;
                }
                Err(e) => {
                    allocated = Err(e);
                    break;
                }
            }
        }
        // blocks taken so far stay owned by the file
        if grown {
            self.save_inode(&mut inode, handle)?;
        }
        allocated?;

        let mut written = 0;
        for logical in first..=last {
            let block = inode
                .block(logical)?
                .ok_or(Error::BlockNotAllocated(logical))?;
            let (from, to) = span_in_block(logical, offset, end, blk_size);
            let chunk = &data[written..written + (to - from)];

            if to - from == blk_size as usize {
                self.write_block(block, chunk)?;
            } else {
                let mut buf = self.read_block(block)?;
                buf[from..to].copy_from_slice(chunk);
                self.write_block(block, &buf)?;
            }
            written += to - from;
        }

        if end > inode.size {
            inode.size = end;
        }
        inode.touch_modified();
        self.save_inode(&mut inode, handle)?;
        debug!("wrote {} bytes at {} to inode {}", written, offset, handle);

        Ok(written)
    }
}
