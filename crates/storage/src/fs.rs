//! Filesystem helpers
//!
//! Directories are created with mode `0700` and files with `0600`. Both are
//! applied through the open/mkdir calls themselves, so the process umask is
//! never touched.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

const PRIVATE_DIR_MODE: u32 = 0o700;
const PRIVATE_FILE_MODE: u32 = 0o600;

/// Suffix of retained payload side files
pub const PAYLOAD_SUFFIX: &str = ".msg";
/// Suffix of files being written before their rename into place
pub const TEMP_SUFFIX: &str = ".tmp";
/// Suffix of editor/backup copies left in the tree
pub const BACKUP_SUFFIX: &str = "~";

/// Returns true for names that never hold a primary record.
pub fn is_side_file(name: &str) -> bool {
    name.ends_with(PAYLOAD_SUFFIX) || name.ends_with(TEMP_SUFFIX) || name.ends_with(BACKUP_SUFFIX)
}

fn dir_builder(recursive: bool) -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    builder.mode(PRIVATE_DIR_MODE);
    builder
}

/// Create a single owner-only directory.
///
/// Returns `Ok(true)` if this call created it and `Ok(false)` if it already
/// existed. A missing parent is reported as `NotFound`.
pub fn create_private_dir(path: &Path) -> io::Result<bool> {
    match dir_builder(false).create(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create an owner-only directory and any missing parents.
pub fn create_private_dir_all(path: &Path) -> io::Result<()> {
    dir_builder(true).create(path)
}

/// Exclusively create an owner-only file for writing.
///
/// Fails with `AlreadyExists` if the name is taken.
pub fn create_private_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(PRIVATE_FILE_MODE);
    options.open(path)
}

/// Remove a file, treating "already gone" as success.
///
/// Returns whether this call removed it.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort cleanup on an error path: failures are logged, not returned.
pub fn remove_or_warn(path: &Path) -> bool {
    match remove_if_exists(path) {
        Ok(removed) => removed,
        Err(e) => {
            tracing::warn!(
                target: "mqsession::storage",
                path = %path.display(),
                error = %e,
                "Failed to remove leftover file"
            );
            false
        }
    }
}

/// Open a directory for listing; `None` if it does not exist.
pub fn read_dir_if_exists(dir: &Path) -> io::Result<Option<fs::ReadDir>> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Recursively delete everything below `dir`, keeping `dir` itself.
///
/// Returns the number of files removed. A missing directory counts as
/// already empty.
pub fn clear_dir_contents(dir: &Path) -> io::Result<u64> {
    let Some(entries) = read_dir_if_exists(dir)? else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            removed += clear_dir_contents(&path)?;
            match fs::remove_dir(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        } else if remove_if_exists(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}
