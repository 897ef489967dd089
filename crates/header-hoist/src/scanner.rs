//! Walks one target's header tree into a shared store and path index.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{ContentStore, Fingerprint, PathIndex, Slot, trim_content};
use crate::target::Target;
use crate::util;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: usize,
    /// Trimmed content bytes read.
    pub bytes: u64,
    /// Sum of sizes of files whose content was already in the store. An
    /// estimate; the resolver does the exact accounting.
    pub reclaimable: u64,
    pub skipped: usize,
}

impl ScanStats {
    pub fn absorb(&mut self, other: ScanStats) {
        self.files += other.files;
        self.bytes += other.bytes;
        self.reclaimable += other.reclaimable;
        self.skipped += other.skipped;
    }
}

/// Scans `dir` as layer member `member`. A missing directory contributes
/// nothing; a non-directory is an input error.
pub fn scan_target(
    dir: &Path,
    target: &Target,
    member: usize,
    store: &mut ContentStore,
    index: &mut PathIndex,
) -> Result<ScanStats> {
    let mut stats = ScanStats::default();
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(Error::input(format!(
                "target root {} is not a directory",
                dir.display()
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(variant = %target, dir = %dir.display(), "target root missing; no files");
            return Ok(stats);
        }
        Err(e) => return Err(Error::io("inspect", dir, e)),
    }

    let walker = walkdir::WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        let ft = entry.file_type();
        if ft.is_dir() {
            continue;
        }
        let p = entry.path();
        if !ft.is_file() {
            warn!(variant = %target, path = %p.display(), "skipping entry that is neither file nor directory");
            stats.skipped += 1;
            continue;
        }

        let rel = p
            .strip_prefix(dir)
            .map_err(|e| Error::integrity(format!("walked entry outside its root: {e}")))?;
        let rel = util::rel_path_string(rel)?;
        let data = fs::read(p).map_err(|e| Error::io("read", p, e))?;
        let content = trim_content(&data);
        let fingerprint = Fingerprint::compute(&rel, content);

        match index.check(&rel, member, &fingerprint, store) {
            Slot::Vacant => {}
            Slot::SameRecord => continue,
            Slot::Conflict(prev) => {
                return Err(Error::integrity(format!(
                    "target {target} produced two different contents for '{rel}' ({} and {fingerprint})",
                    store.get(prev).fingerprint
                )));
            }
        }

        let (id, existed) = store.observe(fingerprint, content);
        if existed {
            let size = store.get(id).size();
            stats.reclaimable += size;
            debug!(
                variant = %target,
                path = %rel,
                bytes = size,
                hits = store.get(id).hit_count,
                "duplicate"
            );
        }
        index.insert(&rel, member, id);
        stats.files += 1;
        stats.bytes += content.len() as u64;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
        fs::write(p, content).expect("write");
    }

    fn target(name: &str) -> Target {
        name.parse().expect("target")
    }

    #[test]
    fn counts_cross_target_duplicates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        write(&a, "stdio.h", "int printf();\n");
        write(&a, "sys/types.h", "A");
        write(&b, "stdio.h", "\n  int printf();");
        write(&b, "sys/types.h", "B");

        let mut store = ContentStore::new();
        let mut index = PathIndex::new();
        let sa = scan_target(&a, &target("x86_64-macos.11-none"), 0, &mut store, &mut index)
            .expect("scan a");
        let sb = scan_target(&b, &target("aarch64-macos.11-none"), 1, &mut store, &mut index)
            .expect("scan b");

        assert_eq!(sa.files, 2);
        assert_eq!(sa.reclaimable, 0);
        assert_eq!(sb.reclaimable, "int printf();".len() as u64);
        assert_eq!(store.len(), 3);

        let stdio = index.get("stdio.h").expect("stdio entries");
        assert_eq!(stdio.len(), 2);
        assert_eq!(stdio[0].record, stdio[1].record);
        assert_eq!(store.get(stdio[0].record).hit_count, 2);
        assert_eq!(index.get("sys/types.h").map(|e| e.len()), Some(2));
    }

    #[test]
    fn missing_root_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut store = ContentStore::new();
        let mut index = PathIndex::new();
        let stats = scan_target(
            &tmp.path().join("absent"),
            &target("x86_64-macos.11-none"),
            0,
            &mut store,
            &mut index,
        )
        .expect("scan");
        assert_eq!(stats, ScanStats::default());
        assert!(index.is_empty());
    }

    #[test]
    fn file_root_is_input_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let f = tmp.path().join("file");
        fs::write(&f, "x").expect("write");
        let err = scan_target(
            &f,
            &target("x86_64-macos.11-none"),
            0,
            &mut ContentStore::new(),
            &mut PathIndex::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Input);
    }

    #[test]
    fn rescan_into_fresh_store_is_identical() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "a.h", "X");
        write(tmp.path(), "b/c.h", "Y");
        let t = target("x86_64-macos.11-none");

        let snapshot = || {
            let mut store = ContentStore::new();
            let mut index = PathIndex::new();
            scan_target(tmp.path(), &t, 0, &mut store, &mut index).expect("scan");
            let mut out: Vec<_> = store
                .records()
                .map(|r| (r.fingerprint, r.hit_count))
                .collect();
            out.sort();
            out
        };
        assert_eq!(snapshot(), snapshot());
    }

    #[test]
    fn rescan_of_same_member_does_not_inflate_counts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "a.h", "X");
        let t = target("x86_64-macos.11-none");
        let mut store = ContentStore::new();
        let mut index = PathIndex::new();
        scan_target(tmp.path(), &t, 0, &mut store, &mut index).expect("first");
        scan_target(tmp.path(), &t, 0, &mut store, &mut index).expect("second");
        let entries = index.get("a.h").expect("entries");
        assert_eq!(store.get(entries[0].record).hit_count, 1);
    }

    #[test]
    fn conflicting_content_for_one_member_is_integrity_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "a.h", "X");
        let t = target("x86_64-macos.11-none");
        let mut store = ContentStore::new();
        let mut index = PathIndex::new();
        scan_target(tmp.path(), &t, 0, &mut store, &mut index).expect("first");
        write(tmp.path(), "a.h", "changed");
        let err = scan_target(tmp.path(), &t, 0, &mut store, &mut index).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped_and_counted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "real.h", "X");
        std::os::unix::fs::symlink("real.h", tmp.path().join("alias.h")).expect("symlink");

        let mut store = ContentStore::new();
        let mut index = PathIndex::new();
        let stats = scan_target(
            tmp.path(),
            &target("x86_64-macos.11-none"),
            0,
            &mut store,
            &mut index,
        )
        .expect("scan");
        assert_eq!(stats.files, 1);
        assert_eq!(stats.skipped, 1);
        assert!(index.get("alias.h").is_none());
        assert!(index.get("real.h").is_some());
    }
}
