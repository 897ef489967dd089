//! Moves staged trees into their final place.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::util;
use crate::workspace::HeaderRoot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
    pub skipped: usize,
}

/// Recursively copies `src` into `dst`, verifying each file's length after
/// the copy. Entries that are neither directories nor regular files are
/// skipped with a warning.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<CopyStats> {
    if !src.is_dir() {
        return Err(Error::input(format!(
            "source is not a directory: {}",
            src.display()
        )));
    }
    if dst.exists() && !dst.is_dir() {
        return Err(Error::input(format!(
            "destination is not a directory: {}",
            dst.display()
        )));
    }

    let mut stats = CopyStats::default();
    util::ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let p = entry.path();
        let rel = p
            .strip_prefix(src)
            .map_err(|e| Error::integrity(format!("walked entry outside its root: {e}")))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            util::ensure_dir(&out)?;
        } else if ft.is_file() {
            stats.bytes += copy_file_verified(p, &out)?;
            stats.files += 1;
        } else {
            warn!(path = %p.display(), "skipping entry that is neither file nor directory");
            stats.skipped += 1;
        }
    }
    Ok(stats)
}

fn copy_file_verified(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        util::ensure_dir(parent)?;
    }
    let expected = fs::metadata(src)
        .map_err(|e| Error::io("stat", src, e))?
        .len();
    let copied = fs::copy(src, dst).map_err(|e| {
        Error::io(
            &format!("copy {} ->", src.display()),
            dst,
            e,
        )
    })?;
    let written = fs::metadata(dst)
        .map_err(|e| Error::io("stat", dst, e))?
        .len();
    if copied != expected || written != expected {
        return Err(Error::integrity(format!(
            "copy of {} is {} bytes, expected {}",
            dst.display(),
            written,
            expected
        )));
    }
    Ok(written)
}

/// Set-aside area inside a stage for the trees being replaced. Target names
/// never start with a dot, so it cannot clash with a staged tree.
const REPLACED_DIR: &str = ".replaced";

/// Fails with an input error unless every `names` entry under the root is
/// missing or a real directory.
pub fn check_destinations(root: &HeaderRoot, names: &[String]) -> Result<()> {
    for name in names {
        root.check_replaceable(&root.path().join(name))?;
    }
    Ok(())
}

/// Swaps `<root>/<name>` for `<stage>/<name>` for every name. A name with
/// nothing staged ends up with no directory at all.
///
/// Every destination is checked before anything moves. Old trees are renamed
/// into the stage, staged trees renamed into place, and the old trees are
/// only dropped with the stage. If any step fails the old trees are put back.
pub fn promote(root: &HeaderRoot, stage: &Path, names: &[String]) -> Result<()> {
    check_destinations(root, names)?;
    let aside = stage.join(REPLACED_DIR);
    util::ensure_dir(&aside)?;

    let mut set_aside = Vec::new();
    let mut installed = Vec::new();
    if let Err(err) = swap_in(root, stage, &aside, names, &mut set_aside, &mut installed) {
        roll_back(root, &aside, &set_aside, &installed);
        return Err(err);
    }
    debug!(
        replaced = set_aside.len(),
        installed = installed.len(),
        "promoted staged trees"
    );
    Ok(())
}

fn swap_in(
    root: &HeaderRoot,
    stage: &Path,
    aside: &Path,
    names: &[String],
    set_aside: &mut Vec<String>,
    installed: &mut Vec<String>,
) -> Result<()> {
    for name in names {
        let dest = root.path().join(name);
        if !dest.exists() {
            continue;
        }
        rename(&dest, &aside.join(name))?;
        set_aside.push(name.clone());
    }
    for name in names {
        let staged = stage.join(name);
        if !staged.exists() {
            debug!(name = %name, "nothing staged; directory removed");
            continue;
        }
        installed.push(name.clone());
        install(&staged, &root.path().join(name))?;
    }
    Ok(())
}

/// Rename when possible; a verified copy when the stage sits on another
/// filesystem.
fn install(staged: &Path, dest: &Path) -> Result<()> {
    match fs::rename(staged, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let stats = copy_tree(staged, dest)?;
            debug!(
                dest = %dest.display(),
                files = stats.files,
                bytes = stats.bytes,
                "copied staged tree across filesystems"
            );
            Ok(())
        }
        Err(e) => Err(Error::io(&format!("move {} to", staged.display()), dest, e)),
    }
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| Error::io(&format!("move {} to", from.display()), to, e))
}

/// Best effort: undo a partial swap and log anything that could not be undone.
fn roll_back(root: &HeaderRoot, aside: &Path, set_aside: &[String], installed: &[String]) {
    for name in installed.iter().rev() {
        if let Err(e) = root.remove_dir(&root.path().join(name)) {
            warn!(name = %name, error = %e, "rollback could not remove installed tree");
        }
    }
    for name in set_aside.iter().rev() {
        if let Err(e) = rename(&aside.join(name), &root.path().join(name)) {
            warn!(name = %name, error = %e, "rollback could not restore previous tree");
        }
    }
}
