use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::target::Target;

const STAGING_PREFIX: &str = ".hoist-stage-";

/// The single directory holding one subdirectory per target.
#[derive(Debug, Clone)]
pub struct HeaderRoot {
    root: PathBuf,
}

impl HeaderRoot {
    /// Opens an existing root. Anything but a directory is rejected before
    /// any mutation happens.
    pub fn open(root: &Path) -> Result<Self> {
        let meta = fs::metadata(root).map_err(|e| Error::io("inspect header root", root, e))?;
        if !meta.is_dir() {
            return Err(Error::input(format!(
                "header root {} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn create(root: &Path) -> Result<Self> {
        if root.exists() {
            return Self::open(root);
        }
        fs::create_dir_all(root).map_err(|e| Error::io("create header root", root, e))?;
        Self::open(root)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, target: &Target) -> PathBuf {
        self.root.join(target.full_name())
    }

    /// Scratch directory inside the root, so staged trees live on the same
    /// filesystem as their final location. Removed on drop.
    pub fn staging(&self) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| Error::io("create staging dir in", &self.root, e))
    }

    /// Removes `dir` if present, refusing anything outside the root.
    pub fn remove_dir(&self, dir: &Path) -> Result<()> {
        safe_remove_dir_all(&self.root, dir)
    }

    /// Ok when `dir` is missing or a real directory; anything else (a file,
    /// a symlink, a fifo) is an input error.
    pub fn check_replaceable(&self, dir: &Path) -> Result<()> {
        match fs::symlink_metadata(dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::input(format!(
                "expected a directory at {}, found a file",
                dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("inspect", dir, e)),
        }
    }
}

pub fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty path"));
    }
    let pb = PathBuf::from(p);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) && !pb.is_absolute() {
        return Err(Error::config(format!("invalid path '{p}' (contains '..')")));
    }
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io("inspect", dir, e)),
    };
    if !meta.is_dir() {
        return Err(Error::input(format!(
            "expected a directory at {}, found a file",
            dir.display()
        )));
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if dir_can == root_can || !dir_can.starts_with(&root_can) {
        return Err(Error::input(format!(
            "refusing to remove '{}' (not inside header root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    fs::remove_dir_all(&dir_can).map_err(|e| Error::io("remove dir", &dir_can, e))
}
