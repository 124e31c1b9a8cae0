pub mod slate;

pub use slate::{
    dir::{DirListing, Stat},
    error::{Error, Result},
    fs::{FormatOptions, SlateFS, Usage},
    storage::{ImageFile, MemoryDisk, Storage},
    types::FileType,
};
