use anyhow::Context;
use slatefs::{ImageFile, SlateFS};
use std::path::Path;

/// Mounts the image at `image_path`, runs `op` on it and unmounts it again,
/// whether `op` succeeded or not.
pub fn with_mounted<P, T, F>(image_path: P, op: F) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    F: FnOnce(&mut SlateFS<ImageFile>) -> slatefs::Result<T>,
{
    let mut fs = SlateFS::new(ImageFile::new(image_path));
    fs.mount()
        .with_context(|| format!("unable to mount {}", fs.store().path().display()))?;

    let result = op(&mut fs);
    fs.unmount()?;

    Ok(result?)
}
