//! Private working copies of configuration directories.
//!
//! `init` writes provider caches and lock files next to the configuration,
//! and local state lands there too. Each orchestrator therefore runs in its
//! own copy so concurrent test cases never touch the shared directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{HarnessError, HarnessResult};

/// Engine data, local state and VCS metadata never make it into a copy.
fn is_engine_artifact(name: &str) -> bool {
    name == ".terraform" || name == ".git" || name.starts_with("terraform.tfstate")
}

/// Directory engine commands run in.
#[derive(Debug)]
pub(crate) struct WorkingCopy {
    dir: PathBuf,
    temp: Option<TempDir>,
}

impl WorkingCopy {
    pub(crate) fn in_place(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            temp: None,
        }
    }

    /// Copy `root` into a fresh temporary directory. Commands run in the
    /// copy of `dir`, which must lie inside `root`.
    pub(crate) fn copy(root: &Path, dir: &Path) -> HarnessResult<Self> {
        if !root.is_dir() {
            return Err(HarnessError::ConfigDirNotFound(root.to_path_buf()));
        }
        let root = fs::canonicalize(root)?;
        let dir = fs::canonicalize(dir)?;
        let relative = dir.strip_prefix(&root).map_err(|_| {
            HarnessError::Config(format!(
                "{} is not inside copy root {}",
                dir.display(),
                root.display()
            ))
        })?;

        let temp = tempfile::Builder::new()
            .prefix("infratest-work-")
            .tempdir()?;
        let files = copy_tree(&root, temp.path())?;
        debug!(
            root = %root.display(),
            copy = %temp.path().display(),
            files,
            "Created working copy"
        );

        Ok(Self {
            dir: temp.path().join(relative),
            temp: Some(temp),
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn is_private(&self) -> bool {
        self.temp.is_some()
    }

    /// Leave the copy on disk after drop. Returns its root.
    pub(crate) fn persist(&mut self) -> Option<PathBuf> {
        self.temp.take().map(TempDir::keep)
    }
}

fn copy_tree(src: &Path, dst: &Path) -> HarnessResult<usize> {
    let walker = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !is_engine_artifact(&entry.file_name().to_string_lossy())
        });

    let mut files = 0;
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }
    Ok(files)
}
