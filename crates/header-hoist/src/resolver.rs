//! Resolves one layer: scan every member, vote per path, stage the generic
//! and per-target trees, then swap them in.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layers::LayerSpec;
use crate::materialize;
use crate::report::{LayerReport, MissedOpportunity};
use crate::scanner::{ScanStats, scan_target};
use crate::store::{ContentStore, PathEntry, PathIndex, RecordId};
use crate::target::Target;
use crate::util;
use crate::workspace::HeaderRoot;

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions<'a> {
    /// Relative paths that always stay per target.
    pub dont_dedup: &'a BTreeSet<String>,
    /// Vote and report, but leave the tree untouched.
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct LayerOutcome {
    pub output: Target,
    pub report: LayerReport,
}

/// Runs one layer to completion and returns its synthetic output target.
pub fn resolve_layer(
    root: &HeaderRoot,
    layer: &LayerSpec,
    opts: ResolveOptions<'_>,
) -> Result<LayerOutcome> {
    let members = layer.members.as_slice();
    let mut report = LayerReport::new(&layer.name, layer.output, members);

    let mut store = ContentStore::new();
    let mut index = PathIndex::new();
    let mut scanned = ScanStats::default();
    for (i, t) in members.iter().enumerate() {
        let stats = scan_target(&root.target_dir(t), t, i, &mut store, &mut index)?;
        debug!(variant = %t, files = stats.files, bytes = stats.bytes, "scanned");
        scanned.absorb(stats);
    }
    report.files_scanned = scanned.files;
    report.bytes_scanned = scanned.bytes;
    report.skipped_entries = scanned.skipped;

    let generic_name = layer.output.full_name();
    let output_dir = root.target_dir(&layer.output);
    report.discarded_output_files = count_files(&output_dir)?;
    if report.discarded_output_files > 0 {
        warn!(
            layer = %layer.name,
            output = %generic_name,
            files = report.discarded_output_files,
            "output directory already holds files; they are not scanned and will be replaced"
        );
    }
    let mut dest_names: Vec<String> = members.iter().map(Target::full_name).collect();
    dest_names.push(generic_name.clone());
    let stage = if opts.dry_run {
        None
    } else {
        materialize::check_destinations(root, &dest_names)?;
        Some(root.staging()?)
    };

    for (path, entries) in index.iter() {
        if !opts.dont_dedup.contains(path) {
            vote(path, entries, members, &mut store, &mut report)?;
            let generic = entries
                .iter()
                .map(|e| e.record)
                .find(|&id| store.get(id).is_generic);
            if let Some(id) = generic {
                let bytes = &store.get(id).bytes;
                if let Some(stage) = &stage {
                    util::write_bytes(&stage.path().join(&generic_name).join(path), bytes)?;
                }
                report.generic_files += 1;
                report.bytes_after += bytes.len() as u64;
            }
        } else {
            debug!(path, "excluded from dedup");
        }

        for e in entries {
            let rec = store.get(e.record);
            if rec.is_generic {
                continue;
            }
            if let Some(stage) = &stage {
                let dest = stage
                    .path()
                    .join(members[e.member].full_name())
                    .join(path);
                util::write_bytes(&dest, &rec.bytes)?;
            }
            report.target_files += 1;
            report.bytes_after += rec.size();
        }
    }

    info!(
        layer = %layer.name,
        output = %generic_name,
        members = members.len(),
        files = report.files_scanned,
        bytes_scanned = report.bytes_scanned,
        bytes_after = report.bytes_after,
        wasted = report.wasted_bytes(),
        "layer resolved"
    );

    if let Some(stage) = stage {
        materialize::promote(root, stage.path(), &dest_names)?;
        stage
            .close()
            .map_err(|e| Error::io("remove staging dir", root.path(), e))?;
    }

    Ok(LayerOutcome {
        output: layer.output,
        report,
    })
}

/// Regular files under `dir`; zero when it is missing or not a directory.
fn count_files(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut n = 0;
    for entry in walkdir::WalkDir::new(dir).follow_links(false) {
        if entry?.file_type().is_file() {
            n += 1;
        }
    }
    Ok(n)
}

/// Majority vote for one path. The record with the highest hit count wins,
/// ties going to the greater fingerprint. The winner is promoted only when
/// at least two members agree on it.
fn vote(
    path: &str,
    entries: &[PathEntry],
    members: &[Target],
    store: &mut ContentStore,
    report: &mut LayerReport,
) -> Result<()> {
    let mut candidates: Vec<RecordId> = entries.iter().map(|e| e.record).collect();
    candidates.sort_by_key(|&id| {
        let r = store.get(id);
        (r.hit_count, r.fingerprint)
    });
    candidates.dedup();

    let Some(winner) = candidates.pop() else {
        return Ok(());
    };
    let hits = store.get(winner).hit_count;
    if hits < 2 {
        return Ok(());
    }
    store.mark_generic(winner)?;
    let size = store.get(winner).size();
    report.bytes_reclaimed += (hits as u64 - 1) * size;
    debug!(path, hits, bytes = size, "promoted to generic");

    for other in candidates {
        let rec = store.get(other);
        if rec.hit_count < 2 {
            continue;
        }
        let wasted = rec.hit_count as u64 * rec.size();
        let targets: Vec<Target> = entries
            .iter()
            .filter(|e| e.record == other)
            .map(|e| members[e.member])
            .collect();
        info!(
            path,
            hits = rec.hit_count,
            wasted_bytes = wasted,
            "missed opportunity: second cluster differs from the generic copy"
        );
        report.missed.push(MissedOpportunity {
            path: path.to_string(),
            hit_count: rec.hit_count,
            size: rec.size(),
            wasted_bytes: wasted,
            targets,
        });
    }
    Ok(())
}
