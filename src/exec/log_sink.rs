//! Destination for command output and progress banners.

use std::fs::File;
use std::io::{self, Write};
use std::process::Stdio;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::paths;

/// Line written after every note so banners stand out between command output.
pub const LOG_SEPARATOR: &str = "======================================================";

/// Where child output and progress notes end up.
///
/// A terminal sink leaves child processes attached to the parent's stdout
/// and stderr. A file sink truncates the file on creation and appends
/// everything after that.
#[derive(Debug)]
pub struct LogSink {
    file: Option<(File, Utf8PathBuf)>,
}

impl LogSink {
    /// Creates a sink that leaves output on the terminal.
    #[must_use]
    pub const fn terminal() -> Self {
        Self { file: None }
    }

    /// Creates (or truncates) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be created.
    pub fn create(path: &Utf8Path) -> io::Result<Self> {
        let (dir, file_name) = paths::open_parent(path)?;
        let file = dir.create(file_name)?.into_std();
        Ok(Self {
            file: Some((file, path.to_path_buf())),
        })
    }

    /// Path of the backing log file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.file.as_ref().map(|(_, path)| path.as_path())
    }

    /// Records a progress message on the console and in the log file.
    pub fn note(&self, message: &str) {
        info!("{message}");

        let Some((file, path)) = &self.file else {
            return;
        };
        let mut handle: &File = file;
        if let Err(err) = writeln!(handle, "{message}\n{LOG_SEPARATOR}") {
            warn!(path = %path, error = %err, "failed to write to log file");
        }
    }

    /// Returns stdout/stderr handles for a child process. With a log file
    /// both handles are clones of the same descriptor, so output interleaves.
    pub(crate) fn child_stdio(&self) -> io::Result<(Stdio, Stdio)> {
        match &self.file {
            Some((file, _)) => Ok((
                Stdio::from(file.try_clone()?),
                Stdio::from(file.try_clone()?),
            )),
            None => Ok((Stdio::inherit(), Stdio::inherit())),
        }
    }
}
