//! Path resolution and the directory tree.
//!
//! A directory's content is the concatenation of its data blocks, each one
//! holding `block_size / 260` entry slots. Slots are unordered; an entry is
//! live when its inode index is non-zero. Lookups walk blocks in table order
//! and slots in storage order and stop at the first match.

use super::{
    error::{Diagnose, Error, Result},
    extent::BlockMap,
    fs::SlateFS,
    path,
    storage::Storage,
    types::{DirEntry, FileType, Inode},
    util, ROOT_INODE,
};
use log::{info, warn};

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub name: String,
    pub inode: u32,
    pub kind: FileType,
    pub mode: u32,
    pub size: u64,
    pub created_at: u64,
}

/// Metadata of a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub inode: u32,
    pub kind: FileType,
    pub mode: u32,
    pub size: u64,
    pub blocks: usize,
    pub created_at: u64,
    pub modified_at: u64,
    pub accessed_at: u64,
    pub label: String,
}

impl<S: Storage> SlateFS<S> {
    fn read_entries(&self, block: u32) -> Result<Vec<DirEntry>> {
        let buf = self.read_block(block)?;

        // trailing bytes too short for an entry are never used
        buf.chunks_exact(util::dir_entry_size())
            .map(|chunk| bincode::deserialize(chunk).map_err(Error::from))
            .collect()
    }

    fn write_entry(&mut self, block: u32, slot: usize, entry: &DirEntry) -> Result<()> {
        let offset = self.block_seek_position(block)? + (slot * util::dir_entry_size()) as u64;
        let buf = bincode::serialize(entry)?;
        self.store.write_at(offset, &buf)?;

        Ok(())
    }

    /// First entry of `dir` accepted by `pred`, with its block and slot.
    fn find_entry<F>(&self, dir: &Inode, pred: F) -> Result<Option<(u32, usize, DirEntry)>>
    where
        F: Fn(&DirEntry) -> bool,
    {
        for logical in 0..dir.capacity() {
            let block = match dir.block(logical)? {
                Some(block) => block,
                None => continue,
            };
            let found = self
                .read_entries(block)?
                .into_iter()
                .enumerate()
                .find(|(_, entry)| pred(entry));
            if let Some((slot, entry)) = found {
                return Ok(Some((block, slot, entry)));
            }
        }

        Ok(None)
    }

    /// Live entries of `dir` in block-then-slot order.
    fn live_entries(&self, dir: &Inode) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for logical in 0..dir.capacity() {
            if let Some(block) = dir.block(logical)? {
                entries.extend(
                    self.read_entries(block)?
                        .into_iter()
                        .filter(|entry| !entry.is_empty()),
                );
            }
        }

        Ok(entries)
    }

    pub(crate) fn lookup(&self, path: &str) -> Result<u32> {
        let mut current = ROOT_INODE;
        let mut walked = String::from("/");

        for name in path::segments(path) {
            let inode = self.find_inode(current)?;
            if !inode.is_dir() {
                return Err(Error::NotADirectory(walked));
            }

            match self.find_entry(&inode, |entry| !entry.is_empty() && entry.name.matches(name))? {
                Some((_, _, entry)) => current = entry.inode,
                None => {
                    return Err(Error::PathNotFound {
                        name: name.to_string(),
                        parent: walked,
                    })
                }
            }
            walked.push_str(name);
            walked.push('/');
        }

        Ok(current)
    }

    fn parent_of(&self, path: &str) -> Result<u32> {
        let (parent, _) = path::split_last(path)?;
        self.lookup(parent)
    }

    /// Resolves a path to its inode index. `/` is always the root inode.
    pub fn path_to_inode(&self, path: &str) -> Result<u32> {
        self.lookup(path).diagnose("resolve", path)
    }

    pub fn get_parent_inode(&self, path: &str) -> Result<u32> {
        self.parent_of(path).diagnose("resolve parent of", path)
    }

    /// Stores `name -> child` in the first empty slot of `parent`, growing the
    /// directory by one block when every allocated block is full.
    pub fn add_directory_entry(&mut self, parent: u32, name: &str, child: u32) -> Result<()> {
        let entry = DirEntry::new(name, child)?;
        if name.is_empty() {
            return Err(Error::InvalidPath(name.to_string()));
        }

        let mut dir = self.find_inode(parent)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory(format!("inode {}", parent)));
        }

        for logical in 0..dir.capacity() {
            // a directory without blocks, like a fresh root, gets its first one here
            let block = match dir.block(logical)? {
                Some(block) => block,
                None => {
                    let block = self.allocate_data_block()?;
                    dir.set_block(logical, Some(block))?;
                    self.save_inode(&mut dir, parent)?;
                    block
                }
            };

            let entries = self.read_entries(block)?;
            if let Some(slot) = entries.iter().position(DirEntry::is_empty) {
                self.write_entry(block, slot, &entry)?;
                dir.size += util::dir_entry_size() as u64;
                dir.touch_modified();
                return self.save_inode(&mut dir, parent);
            }
        }

        Err(Error::DirectoryFull)
    }

    pub fn remove_directory_entry(&mut self, parent: u32, child: u32) -> Result<()> {
        let mut dir = self.find_inode(parent)?;
        match self.find_entry(&dir, |entry| entry.inode == child)? {
            Some((block, slot, _)) => {
                self.write_entry(block, slot, &DirEntry::default())?;
                dir.size = dir.size.saturating_sub(util::dir_entry_size() as u64);
                dir.touch_modified();
                self.save_inode(&mut dir, parent)
            }
            None => Err(Error::MissingEntry { parent, child }),
        }
    }

    fn make_node(&mut self, path: &str, kind: FileType) -> Result<u32> {
        match self.lookup(path) {
            Ok(_) => return Err(Error::AlreadyExists(path.to_string())),
            Err(Error::PathNotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let (parent_path, name) = path::split_last(path)?;
        DirEntry::new(name, 0)?;
        let parent = self.lookup(parent_path)?;
        if !self.find_inode(parent)?.is_dir() {
            return Err(Error::NotADirectory(parent_path.to_string()));
        }

        let index = self.allocate_inode(kind)?;
        let mut inode = Inode::new(kind, path);
        let linked = self
            .save_inode(&mut inode, index)
            .and_then(|_| self.add_directory_entry(parent, name, index));
        if let Err(e) = linked {
            if let Err(free_err) = self.free_inode(index) {
                warn!("inode {} could not be released: {}", index, free_err);
            }
            return Err(e);
        }

        Ok(index)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<u32> {
        let index = self
            .make_node(path, FileType::Directory)
            .diagnose("mkdir", path)?;
        info!("directory created: {} inode {}", path, index);

        Ok(index)
    }

    pub fn create(&mut self, path: &str) -> Result<u32> {
        let index = self
            .make_node(path, FileType::RegularFile)
            .diagnose("create", path)?;
        info!("file created: {} inode {}", path, index);

        Ok(index)
    }

    fn unlink(&mut self, path: &str, kind: FileType) -> Result<()> {
        let index = self.lookup(path)?;
        if index == ROOT_INODE {
            return Err(Error::NoParent(path.to_string()));
        }

        let inode = self.find_inode(index)?;
        match (kind, inode.kind()) {
            (FileType::Directory, Some(FileType::Directory)) => {
                if inode.size > 0 && self.find_entry(&inode, |entry| !entry.is_empty())?.is_some()
                {
                    return Err(Error::DirectoryNotEmpty(path.to_string()));
                }
            }
            (FileType::Directory, _) => return Err(Error::NotADirectory(path.to_string())),
            (FileType::RegularFile, Some(FileType::RegularFile)) => {}
            (FileType::RegularFile, _) => return Err(Error::NotAFile(path.to_string())),
        }

        let parent = self.parent_of(path)?;
        self.remove_directory_entry(parent, index)?;
        self.free_inode(index)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.unlink(path, FileType::Directory).diagnose("rmdir", path)?;
        info!("directory removed: {}", path);

        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.unlink(path, FileType::RegularFile)
            .diagnose("remove", path)?;
        info!("file removed: {}", path);

        Ok(())
    }

    /// Moves the working directory `current` to `target`. `current` always
    /// ends with a separator.
    pub fn change_dir(&self, current: &mut String, target: &str) -> Result<()> {
        self.change_dir_inner(current, target)
            .diagnose("cd", target)
    }

    fn change_dir_inner(&self, current: &mut String, target: &str) -> Result<()> {
        match target {
            "" | "." => Ok(()),
            ".." => {
                if path::is_root(current) {
                    return Err(Error::NoParent(current.clone()));
                }
                *current = path::pop(current)?;
                Ok(())
            }
            _ => {
                let full = path::absolute(current, target);
                let index = self.lookup(&full)?;
                if !self.find_inode(index)?.is_dir() {
                    return Err(Error::NotADirectory(full));
                }
                *current = path::with_separator(&full);
                Ok(())
            }
        }
    }

    /// Lists a directory in storage order. Only the directory's access time
    /// changes.
    pub fn list(&mut self, path: &str) -> Result<Vec<DirListing>> {
        self.list_inner(path).diagnose("list", path)
    }

    fn list_inner(&mut self, path: &str) -> Result<Vec<DirListing>> {
        let index = self.lookup(path)?;
        let mut dir = self.find_inode(index)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        dir.touch_accessed();
        self.save_inode(&mut dir, index)?;

        let mut rows = Vec::new();
        for entry in self.live_entries(&dir)? {
            let child = self.find_inode(entry.inode)?;
            let kind = child
                .kind()
                .ok_or_else(|| Error::InvalidInode(entry.inode))?;
            rows.push(DirListing {
                name: entry.name.as_str().into_owned(),
                inode: entry.inode,
                kind,
                mode: child.mode,
                size: child.size,
                created_at: child.created_at,
            });
        }

        Ok(rows)
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let index = self.lookup(path).diagnose("stat", path)?;
        let inode = self.find_inode(index)?;
        let kind = inode.kind().ok_or(Error::InvalidInode(index))?;

        Ok(Stat {
            inode: index,
            kind,
            mode: inode.mode,
            size: inode.size,
            blocks: inode.owned_blocks().len(),
            created_at: inode.created_at,
            modified_at: inode.modified_at,
            accessed_at: inode.accessed_at,
            label: inode.label.as_str().into_owned(),
        })
    }
}
