// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Scoped scratch files for in-flight payloads.
//!
//! A [`StagedFile`] owns its path: the file is removed when the guard is
//! dropped, whichever way the owning request finishes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Staging directory on the data volume.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and remove anything left over from a crash.
    pub fn initialize(&self) -> io::Result<usize> {
        fs::create_dir_all(&self.dir)?;
        let mut purged = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, dir = %self.dir.display(), "Purged stale staging files");
        }
        Ok(purged)
    }

    /// Reserve a unique staging path. Nothing is created on disk yet.
    pub fn allocate(&self, label: &str) -> StagedFile {
        let name = format!("{}-{label}", uuid::Uuid::new_v4().simple());
        StagedFile {
            path: self.dir.join(name),
        }
    }
}

/// Guard that deletes its file on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Staging file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staging file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn guard_removes_file_on_drop() {
        let temp = TempDir::new().unwrap();
        let area = StagingArea::new(temp.path().join("staging"));
        area.initialize().unwrap();

        let path = {
            let staged = area.allocate("upload.enc");
            fs::write(staged.path(), b"payload").unwrap();
            assert!(staged.path().exists());
            staged.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn guard_tolerates_never_created_file() {
        let temp = TempDir::new().unwrap();
        let area = StagingArea::new(temp.path());
        drop(area.allocate("unused"));
    }

    #[test]
    fn initialize_purges_leftovers() {
        let temp = TempDir::new().unwrap();
        let area = StagingArea::new(temp.path().join("staging"));
        area.initialize().unwrap();
        fs::write(area.dir().join("stale-1"), b"x").unwrap();
        fs::write(area.dir().join("stale-2"), b"y").unwrap();

        assert_eq!(area.initialize().unwrap(), 2);
        assert_eq!(fs::read_dir(area.dir()).unwrap().count(), 0);
    }

    #[test]
    fn allocations_are_unique() {
        let area = StagingArea::new("/tmp/staging");
        let a = area.allocate("x");
        let b = area.allocate("x");
        assert_ne!(a.path(), b.path());
    }
}
