//! Scoped temporary files and directories.
//!
//! Every file the pipeline writes lives inside a [`ScopedTempResource`]. The
//! guard owns its path exclusively and deletes it exactly once: through
//! [`ScopedTempResource::release`] on the normal path, or when it is dropped
//! on an early return, an error, or a cancelled future.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, TempPath};

/// Prefix for every temp entry created by the relay.
pub const TEMP_PREFIX: &str = "pixiv-relay-";

enum Backing {
    File(TempPath),
    Dir(TempDir),
}

/// Exclusive owner of a temporary file or directory.
pub struct ScopedTempResource {
    backing: Backing,
}

impl ScopedTempResource {
    /// Allocate an empty file under `dir`, or the system temp dir when `None`.
    ///
    /// The guard is returned together with an open write handle; ownership of
    /// the path belongs to the guard from this point on.
    pub fn file_in(dir: Option<&Path>) -> io::Result<(Self, File)> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let named = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = named.into_parts();
        Ok((
            Self {
                backing: Backing::File(path),
            },
            file,
        ))
    }

    /// Allocate an empty directory under `dir`, or the system temp dir when `None`.
    pub fn dir_in(dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let temp_dir = match dir {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        Ok(Self {
            backing: Backing::Dir(temp_dir),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.backing {
            Backing::File(path) => path,
            Backing::Dir(dir) => dir.path(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.backing, Backing::Dir(_))
    }

    /// Delete the resource now and report any filesystem error.
    ///
    /// Consumes the guard, so a resource can never be released twice.
    pub fn release(self) -> io::Result<()> {
        match self.backing {
            Backing::File(path) => path.close(),
            Backing::Dir(dir) => dir.close(),
        }
    }

    /// Owned copy of the path, for logging after release.
    pub fn to_path_buf(&self) -> PathBuf {
        self.path().to_path_buf()
    }
}

impl fmt::Debug for ScopedTempResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedTempResource")
            .field("path", &self.path())
            .field("dir", &self.is_dir())
            .finish()
    }
}
