use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use header_hoist::layers::LayerSpec;
use header_hoist::resolver::{ResolveOptions, resolve_layer};
use header_hoist::target::Target;
use header_hoist::workspace::HeaderRoot;

fn t(name: &str) -> Target {
    name.parse().expect("target")
}

fn write(root: &Path, target: &str, rel: &str, content: &str) {
    let p = root.join(target).join(rel);
    fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
    fs::write(p, content).expect("write");
}

fn read(root: &Path, target: &str, rel: &str) -> Option<String> {
    fs::read_to_string(root.join(target).join(rel)).ok()
}

/// Every file under `dir`, keyed by relative path.
fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.expect("walk");
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .expect("strip")
            .to_string_lossy()
            .replace('\\', "/");
        if rel.starts_with(".hoist-stage-") {
            continue;
        }
        out.insert(rel, fs::read(entry.path()).expect("read"));
    }
    out
}

fn layer(output: &str, members: &[&str]) -> LayerSpec {
    LayerSpec {
        name: output.into(),
        output: t(output),
        members: members.iter().map(|m| t(m)).collect(),
    }
}

fn resolve(root: &Path, spec: &LayerSpec, dont_dedup: &BTreeSet<String>) -> header_hoist::resolver::LayerOutcome {
    let root = HeaderRoot::open(root).expect("open root");
    resolve_layer(
        &root,
        spec,
        ResolveOptions {
            dont_dedup,
            dry_run: false,
        },
    )
    .expect("resolve")
}

const T1: &str = "x86_64-macos.11-none";
const T2: &str = "aarch64-macos.11-none";
const T3: &str = "x86_64-macos.12-none";
const GENERIC: &str = "any-macos.11-any";

#[test]
fn majority_content_is_hoisted_and_minority_stays() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a", "X");
    write(root, T1, "b", "Y");
    write(root, T2, "a", "X");
    write(root, T2, "b", "Z");
    write(root, T3, "a", "X");
    write(root, T3, "b", "Y");

    let spec = layer(GENERIC, &[T1, T2, T3]);
    let outcome = resolve(root, &spec, &BTreeSet::new());

    assert_eq!(outcome.output, t(GENERIC));
    assert_eq!(read(root, GENERIC, "a").as_deref(), Some("X"));
    assert_eq!(read(root, GENERIC, "b").as_deref(), Some("Y"));
    assert_eq!(read(root, T2, "b").as_deref(), Some("Z"));
    assert_eq!(read(root, T2, "a"), None);
    assert!(!root.join(T1).exists());
    assert!(!root.join(T3).exists());

    assert_eq!(outcome.report.generic_files, 2);
    assert_eq!(outcome.report.target_files, 1);
    assert_eq!(outcome.report.files_scanned, 6);
    assert_eq!(outcome.report.bytes_scanned, 6);
    assert_eq!(outcome.report.bytes_after, 3);
    assert_eq!(outcome.report.bytes_reclaimed, 3);
    assert!(outcome.report.missed.is_empty());
    assert_eq!(outcome.report.discarded_output_files, 0);
}

#[test]
fn two_by_two_split_promotes_one_cluster_and_reports_the_other() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    let members = [T1, T2, T3, "aarch64-macos.12-none"];
    write(root, members[0], "h.h", "left");
    write(root, members[1], "h.h", "left");
    write(root, members[2], "h.h", "right");
    write(root, members[3], "h.h", "right");

    let outcome = resolve(root, &layer("any-macos-any", &members), &BTreeSet::new());

    let generic = read(root, "any-macos-any", "h.h").expect("one cluster promoted");
    let loser = if generic == "left" { "right" } else { "left" };
    let loser_members: Vec<&str> = members
        .iter()
        .copied()
        .filter(|m| read(root, m, "h.h").is_some())
        .collect();
    assert_eq!(loser_members.len(), 2);
    for m in &loser_members {
        assert_eq!(read(root, m, "h.h").as_deref(), Some(loser));
    }

    assert_eq!(outcome.report.missed.len(), 1);
    let missed = &outcome.report.missed[0];
    assert_eq!(missed.path, "h.h");
    assert_eq!(missed.hit_count, 2);
    assert_eq!(missed.wasted_bytes, 2 * loser.len() as u64);
    let mut reported: Vec<String> = missed.targets.iter().map(Target::full_name).collect();
    reported.sort();
    let mut expected: Vec<String> = loser_members.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(reported, expected);
}

#[test]
fn tie_break_is_stable_across_runs() {
    let run = || {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(root, T1, "h.h", "one");
        write(root, T2, "h.h", "one");
        write(root, T3, "h.h", "two");
        write(root, "aarch64-macos.12-none", "h.h", "two");
        resolve(
            root,
            &layer("any-macos-any", &[T1, T2, T3, "aarch64-macos.12-none"]),
            &BTreeSet::new(),
        );
        read(root, "any-macos-any", "h.h").expect("generic")
    };
    let first = run();
    for _ in 0..3 {
        assert_eq!(run(), first);
    }
}

#[test]
fn path_and_body_boundaries_never_merge_records() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a.h", "hX");
    write(root, T2, "a.hh", "X");

    let outcome = resolve(root, &layer(GENERIC, &[T1, T2]), &BTreeSet::new());

    assert_eq!(outcome.report.generic_files, 0);
    assert_eq!(outcome.report.target_files, 2);
    assert!(!root.join(GENERIC).exists());
    assert_eq!(read(root, T1, "a.h").as_deref(), Some("hX"));
    assert_eq!(read(root, T1, "a.hh"), None);
    assert_eq!(read(root, T2, "a.hh").as_deref(), Some("X"));
    assert_eq!(read(root, T2, "a.h"), None);
}

#[test]
fn excluded_paths_never_reach_the_generic_dir() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    for m in [T1, T2] {
        write(root, m, "libkern/OSAtomic.h", "same everywhere");
        write(root, m, "stdio.h", "shared");
    }
    let dont_dedup: BTreeSet<String> = ["libkern/OSAtomic.h".to_string()].into();

    resolve(root, &layer(GENERIC, &[T1, T2]), &dont_dedup);

    assert_eq!(read(root, GENERIC, "libkern/OSAtomic.h"), None);
    assert_eq!(read(root, GENERIC, "stdio.h").as_deref(), Some("shared"));
    for m in [T1, T2] {
        assert_eq!(
            read(root, m, "libkern/OSAtomic.h").as_deref(),
            Some("same everywhere")
        );
    }
}

#[test]
fn only_trailing_and_leading_whitespace_is_ignored() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "ends.h", "\n\tint x;\r\n");
    write(root, T2, "ends.h", "int x;\n\n");
    write(root, T1, "inner.h", "int x;\n\nint y;");
    write(root, T2, "inner.h", "int x;\nint y;");

    resolve(root, &layer(GENERIC, &[T1, T2]), &BTreeSet::new());

    assert_eq!(read(root, GENERIC, "ends.h").as_deref(), Some("int x;"));
    assert_eq!(read(root, GENERIC, "inner.h"), None);
    assert_eq!(read(root, T1, "inner.h").as_deref(), Some("int x;\n\nint y;"));
    assert_eq!(read(root, T2, "inner.h").as_deref(), Some("int x;\nint y;"));
}

#[test]
fn every_input_file_survives_in_member_or_generic_dir() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    let members = [T1, T2, T3];
    let mut inputs = Vec::new();
    for (i, m) in members.iter().enumerate() {
        for j in 0..6 {
            // Mix of shared, pairwise and unique content across nested dirs.
            let rel = format!("d{}/h{j}.h", j % 2);
            let body = match j {
                0 | 1 => "common".to_string(),
                2 => format!("pair{}", i.min(1)),
                _ => format!("unique-{m}-{j}"),
            };
            write(root, m, &rel, &format!("  {body}\n"));
            inputs.push((m.to_string(), rel, body));
        }
    }

    resolve(root, &layer(GENERIC, &members), &BTreeSet::new());

    for (m, rel, body) in inputs {
        let own = read(root, &m, &rel);
        let generic = read(root, GENERIC, &rel);
        let seen = own.clone().or(generic.clone()).expect("file lost");
        assert_eq!(seen, body, "{m}/{rel}");
        // Never in both places for the same member unless content differs.
        if let (Some(o), Some(g)) = (own, generic) {
            assert_ne!(o, g, "{m}/{rel} duplicated");
        }
    }
}

#[test]
fn output_is_independent_of_member_order() {
    let build = |order: &[&str]| {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        // Create files in a different order too.
        for m in order {
            write(root, m, "z.h", if *m == T2 { "b" } else { "a" });
            write(root, m, "a/b.h", "shared");
            write(root, m, "m.h", m);
        }
        resolve(root, &layer(GENERIC, order), &BTreeSet::new());
        snapshot(root)
    };
    let first = build(&[T1, T2, T3]);
    let second = build(&[T3, T1, T2]);
    assert_eq!(first, second);
}

#[test]
fn stale_files_from_previous_runs_are_removed() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a.h", "X");
    write(root, T2, "a.h", "X");
    write(root, GENERIC, "old.h", "left over");

    let outcome = resolve(root, &layer(GENERIC, &[T1, T2]), &BTreeSet::new());
    assert_eq!(outcome.report.discarded_output_files, 1);

    assert_eq!(read(root, GENERIC, "old.h"), None);
    assert_eq!(read(root, GENERIC, "a.h").as_deref(), Some("X"));
    let leftovers: Vec<_> = fs::read_dir(root)
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".hoist-stage-"))
        .collect();
    assert!(leftovers.is_empty(), "staging left behind: {leftovers:?}");
}

#[test]
fn missing_member_directory_is_tolerated() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a.h", "X");
    write(root, T2, "a.h", "X");

    let outcome = resolve(root, &layer(GENERIC, &[T1, T2, T3]), &BTreeSet::new());
    assert_eq!(outcome.report.files_scanned, 2);
    assert_eq!(read(root, GENERIC, "a.h").as_deref(), Some("X"));
    assert!(!root.join(T3).exists());
}

#[test]
fn dry_run_leaves_tree_untouched() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a.h", "X");
    write(root, T2, "a.h", "X");
    let before = snapshot(root);

    let dont_dedup = BTreeSet::new();
    let header_root = HeaderRoot::open(root).expect("open");
    let outcome = resolve_layer(
        &header_root,
        &layer(GENERIC, &[T1, T2]),
        ResolveOptions {
            dont_dedup: &dont_dedup,
            dry_run: true,
        },
    )
    .expect("dry run");

    assert_eq!(outcome.report.generic_files, 1);
    assert_eq!(outcome.report.bytes_reclaimed, 1);
    assert_eq!(snapshot(root), before);
}

#[test]
fn member_root_that_is_a_file_aborts_before_mutation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a.h", "X");
    fs::write(root.join(T2), "not a directory").expect("write");
    let before = snapshot(root);

    let dont_dedup = BTreeSet::new();
    let header_root = HeaderRoot::open(root).expect("open");
    let err = resolve_layer(
        &header_root,
        &layer(GENERIC, &[T1, T2]),
        ResolveOptions {
            dont_dedup: &dont_dedup,
            dry_run: false,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), header_hoist::ErrorKind::Input);
    assert_eq!(snapshot(root), before);
}

#[test]
fn generic_destination_that_is_a_file_leaves_members_untouched() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(root, T1, "a.h", "X");
    write(root, T2, "a.h", "X");
    fs::write(root.join(GENERIC), "not a directory").expect("write");
    let before = snapshot(root);

    let dont_dedup = BTreeSet::new();
    let header_root = HeaderRoot::open(root).expect("open");
    let err = resolve_layer(
        &header_root,
        &layer(GENERIC, &[T1, T2]),
        ResolveOptions {
            dont_dedup: &dont_dedup,
            dry_run: false,
        },
    )
    .unwrap_err();
    assert_eq!(err.kind(), header_hoist::ErrorKind::Input);
    assert!(err.to_string().contains(GENERIC), "unexpected err: {err}");
    assert_eq!(snapshot(root), before);
    assert_eq!(read(root, T1, "a.h").as_deref(), Some("X"));
    assert_eq!(read(root, T2, "a.h").as_deref(), Some("X"));
}
