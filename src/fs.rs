//! Capability-scoped file helpers used by privileged operations.
//!
//! Every write is a full replacement of a small file so an agent killed
//! mid-action never leaves a half-edited descriptor behind.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs::Dir, fs::OpenOptions};
use std::io::{self, ErrorKind, Write};

/// Opens the parent directory of `path` and returns it with the file name.
pub(crate) fn parent_dir_and_name(path: &Utf8Path) -> io::Result<(Dir, &str)> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{path} does not name a file"),
        )
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = Dir::open_ambient_dir(parent.as_std_path(), ambient_authority())?;
    Ok((dir, name))
}

/// Replaces `path` with `contents`, flushing to stable storage before the
/// rename makes the new content visible and syncing the directory after it
/// so the rename itself survives a crash.
pub(crate) fn replace_file(path: &Utf8Path, contents: &str) -> io::Result<()> {
    let (dir, name) = parent_dir_and_name(path)?;
    let staging = format!(".{name}.tmp");
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    let mut file = dir.open_with(&staging, &options)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    dir.rename(&staging, &dir, name)?;
    sync_dir(&dir)
}

fn sync_dir(dir: &Dir) -> io::Result<()> {
    dir.open(".")?.sync_all()
}

/// Creates `path` as an empty file, truncating any previous content.
pub(crate) fn touch_file(path: &Utf8Path) -> io::Result<()> {
    let (dir, name) = parent_dir_and_name(path)?;
    let file = dir.create(name)?;
    file.sync_all()
}

/// Removes `path`, treating an already-missing file as success.
pub(crate) fn remove_file_if_exists(path: &Utf8Path) -> io::Result<()> {
    let (dir, name) = parent_dir_and_name(path)?;
    match dir.remove_file(name) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
