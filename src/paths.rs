//! Capability-scoped file access for the few files Ferry touches.

use std::io;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;

/// Opens the directory holding `path` and returns it with the file name.
///
/// A bare file name resolves against the working directory.
pub(crate) fn open_parent(path: &Utf8Path) -> io::Result<(Dir, &str)> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {path}"),
        )
    })?;
    let dir_path = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())?;
    Ok((dir, file_name))
}

/// Reads `path` into a string.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (dir, file_name) = open_parent(path)?;
    dir.read_to_string(file_name)
}
