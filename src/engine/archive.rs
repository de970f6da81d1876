//! Tar bundling for container copy-in/copy-out
//!
//! Bollard moves files through the daemon as tar archives; these helpers
//! build archives from host directories and unpack downloaded archives.
//! Symlinks are skipped on the way in.

use std::io;
use std::path::Path;

use crate::infrastructure::paths::SCRATCH_DIR_NAME;

/// Bundles a directory into an in-memory tar archive.
///
/// Entry paths are relative to `dir`. The scratch root is never included,
/// so copying the invocation directory cannot recurse into its own
/// staging area. Returns the archive and the number of file entries.
pub fn bundle_directory(dir: &Path) -> io::Result<(Vec<u8>, usize)> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut count = 0;
    append_entries(&mut builder, dir, Path::new(""), &mut count)?;
    Ok((builder.into_inner()?, count))
}

fn append_entries(
    builder: &mut tar::Builder<Vec<u8>>,
    dir: &Path,
    prefix: &Path,
    count: &mut usize,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if prefix.as_os_str().is_empty() && name == SCRATCH_DIR_NAME {
            continue;
        }

        let path = entry.path();
        let relative = prefix.join(&name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            builder.append_dir(&relative, &path)?;
            append_entries(builder, &path, &relative, count)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(&path, &relative)?;
            *count += 1;
        }
    }
    Ok(())
}

/// Unpacks an in-memory tar archive into a directory.
pub fn unpack_archive(bytes: &[u8], dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(bytes);
    archive.unpack(dest)
}

/// Number of regular files anywhere under a directory.
pub fn count_files(dir: &Path) -> io::Result<usize> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += count_files(&entry.path())?;
        } else if file_type.is_file() {
            total += 1;
        }
    }
    Ok(total)
}
