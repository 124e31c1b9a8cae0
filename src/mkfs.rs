use anyhow::anyhow;
use byte_unit::{Byte, ByteUnit};
use slatefs::{slate::types::Superblock, Error, FormatOptions, ImageFile, SlateFS};
use std::path::Path;

pub fn make<P>(
    path: P,
    size: &str,
    inode_percent: u32,
    blk_size: u32,
    force: bool,
) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let disk_size = match Byte::from_str(size) {
        Ok(size) => size.get_bytes() as u64,
        Err(err) => return Err(anyhow!(err)),
    };

    Superblock::check_settings(inode_percent, blk_size)?;

    let path = path.as_ref();
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists, use --force to overwrite it",
            path.display()
        ));
    }

    let mut fs = SlateFS::new(ImageFile::new(path));
    let formatted = fs.format_with(&FormatOptions {
        disk_size,
        inode_percent,
        block_size: blk_size,
    });
    match formatted {
        // with valid settings only the size is left to blame
        Err(Error::Geometry(_)) => {
            return Err(anyhow!(
                "File size must be at least {} for block size of {} and {}% of inodes",
                Byte::from_bytes(minimum_size(inode_percent, blk_size) as _)
                    .get_appropriate_unit(true),
                Byte::from_bytes(blk_size as _).get_adjusted_unit(ByteUnit::B),
                inode_percent
            ))
        }
        other => other?,
    }
    fs.unmount()?;

    Ok(())
}

/// Smallest disk, in whole blocks, that holds one inode and one data block.
fn minimum_size(inode_percent: u32, blk_size: u32) -> u64 {
    let mut size = blk_size as u64;
    while Superblock::new(size, inode_percent, blk_size).is_err() {
        size += blk_size as u64;
    }

    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_size_formats() -> anyhow::Result<()> {
        let min = minimum_size(10, 1024);
        Superblock::new(min, 10, 1024)?;
        assert!(Superblock::new(min - 1024, 10, 1024).is_err());

        Ok(())
    }

    #[test]
    fn refuses_to_overwrite() -> anyhow::Result<()> {
        let mut image = std::env::temp_dir();
        image.push("slatefs_mkfs_refuses_to_overwrite.img");
        make(&image, "256KiB", 10, 1024, true)?;

        assert!(make(&image, "256KiB", 10, 1024, false).is_err());
        make(&image, "512KiB", 10, 2048, true)?;
        assert_eq!(std::fs::metadata(&image)?.len(), 512 * 1024);
        let err = make(&image, "1KiB", 10, 1024, true).unwrap_err();
        assert!(err.to_string().starts_with("File size must be at least"));
        assert!(make(&image, "1MiB", 0, 1024, true).is_err());
        assert!(make(&image, "1MiB", 10, 1000, true).is_err());
        // rejected settings leave the image alone
        assert_eq!(std::fs::metadata(&image)?.len(), 512 * 1024);

        Ok(std::fs::remove_file(&image)?)
    }
}
