//! Populates the host target's directory from the system SDK.
//!
//! A probe source including every configured header is run through the C
//! compiler's dependency output (`-M -MF`); every dependency that lives under
//! the SDK include directory is copied into `<root>/<target>/`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::materialize;
use crate::target::{Abi, Arch, Os, OsVersion, Target};
use crate::util;
use crate::workspace::HeaderRoot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub files: usize,
    pub bytes: u64,
}

pub fn host_arch(raw: &str) -> Result<Arch> {
    match raw {
        "x86_64" => Ok(Arch::X86_64),
        "aarch64" => Ok(Arch::Aarch64),
        other => Err(Error::input(format!("unsupported host architecture '{other}'"))),
    }
}

/// `sw_vers -productVersion` output to a target version. Releases before 11
/// are identified by their minor number, later ones by the major alone.
pub fn parse_product_version(raw: &str) -> Result<OsVersion> {
    let raw = raw.trim();
    let mut parts = raw.split('.');
    let bad = || Error::external(format!("unrecognized product version '{raw}'"));
    let major = parts
        .next()
        .and_then(|p| p.parse::<u32>().ok())
        .ok_or_else(bad)?;
    if major == 10 {
        let minor = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(bad)?;
        return Ok(OsVersion::Release {
            major,
            minor: Some(minor),
        });
    }
    Ok(OsVersion::major(major))
}

pub fn detect_host(cfg: &FetchConfig, os: Os) -> Result<Target> {
    let arch = host_arch(std::env::consts::ARCH)?;
    let raw = run_capture(&cfg.version_command)?;
    let version = parse_product_version(&raw)?;
    let target = Target::new(arch, os, version, Abi::None);
    debug!(host = %target, "detected host target");
    Ok(target)
}

fn run_capture(argv: &[String]) -> Result<String> {
    let Some((bin, args)) = argv.split_first() else {
        return Err(Error::config("empty command"));
    };
    let out = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::external(format!("failed to run {bin}: {e}")))?;
    if !out.status.success() {
        return Err(Error::external(format!(
            "{} exited with {}: {}",
            argv.join(" "),
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    String::from_utf8(out.stdout)
        .map_err(|_| Error::external(format!("{} printed non UTF-8 output", argv.join(" "))))
}

fn resolve_sysroot(cfg: &FetchConfig) -> Result<PathBuf> {
    if let Some(s) = cfg.sysroot.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(PathBuf::from(s));
    }
    if cfg.sdk_command.is_empty() {
        return Ok(PathBuf::from("/"));
    }
    let out = run_capture(&cfg.sdk_command)?;
    let out = out.trim();
    if out.is_empty() {
        return Err(Error::external(format!(
            "{} printed no SDK path",
            cfg.sdk_command.join(" ")
        )));
    }
    Ok(PathBuf::from(out))
}

/// Every prerequisite named in a Make-style dependency file, in order.
/// Handles line continuations, `\ ` escaped spaces and `$$`.
pub fn parse_make_deps(text: &str) -> Vec<PathBuf> {
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    let mut out = Vec::new();
    for line in joined.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // Rules without prerequisites (`foo.h:`) carry nothing.
        let Some(i) = line.find(": ") else {
            continue;
        };
        let rest = &line[i + 2..];

        let mut cur = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&' ') => {
                    cur.push(' ');
                    chars.next();
                }
                '$' if chars.peek() == Some(&'$') => {
                    cur.push('$');
                    chars.next();
                }
                c if c.is_whitespace() => {
                    if !cur.is_empty() {
                        out.push(PathBuf::from(std::mem::take(&mut cur)));
                    }
                }
                c => cur.push(c),
            }
        }
        if !cur.is_empty() {
            out.push(PathBuf::from(cur));
        }
    }
    out
}

fn probe_source(headers: &[String]) -> String {
    let mut src = String::new();
    for h in headers {
        let h = h.trim();
        if h.is_empty() {
            continue;
        }
        src.push_str(&format!("#include <{h}>\n"));
    }
    src
}

fn rel_under(dep: &Path, include_dir: &Path, include_can: &Path) -> Option<PathBuf> {
    if let Ok(rel) = dep.strip_prefix(include_dir) {
        return Some(rel.to_path_buf());
    }
    let dep_can = dep.canonicalize().ok()?;
    dep_can.strip_prefix(include_can).ok().map(Path::to_path_buf)
}

/// Replaces `<root>/<target>` with the headers the compiler pulls in.
pub fn fetch_headers(cfg: &FetchConfig, root: &HeaderRoot, target: &Target) -> Result<FetchStats> {
    if cfg.headers.iter().all(|h| h.trim().is_empty()) {
        return Err(Error::config("fetch.headers is empty"));
    }
    let sysroot = resolve_sysroot(cfg)?;
    let include_dir = sysroot.join(cfg.include_prefix.trim().trim_matches('/'));
    if !include_dir.is_dir() {
        return Err(Error::input(format!(
            "include directory {} does not exist",
            include_dir.display()
        )));
    }
    let include_can = include_dir
        .canonicalize()
        .map_err(|e| Error::io("canonicalize", &include_dir, e))?;

    let scratch = tempfile::tempdir().map_err(|e| Error::io("create temp dir in", &std::env::temp_dir(), e))?;
    let probe = scratch.path().join("probe.c");
    let deps = scratch.path().join("probe.d");
    util::write_bytes(&probe, probe_source(&cfg.headers).as_bytes())?;

    let mut cmd = Command::new(&cfg.cc);
    cmd.arg("-E").arg("-M").arg("-MF").arg(&deps);
    if sysroot != Path::new("/") {
        cmd.arg("-isysroot").arg(&sysroot);
    }
    cmd.args(&cfg.extra_args)
        .arg(&probe)
        .stdin(Stdio::null())
        .stdout(Stdio::null());
    debug!(cmd = ?cmd, "running compiler");
    let out = cmd
        .output()
        .map_err(|e| Error::external(format!("failed to run {}: {e}", cfg.cc)))?;
    if !out.status.success() {
        return Err(Error::external(format!(
            "{} exited with {}: {}",
            cfg.cc,
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    let dep_text = fs::read_to_string(&deps).map_err(|e| Error::io("read", &deps, e))?;

    let stage = root.staging()?;
    let staged = stage.path().join(target.full_name());
    let mut seen = BTreeSet::new();
    let mut stats = FetchStats::default();
    for dep in parse_make_deps(&dep_text) {
        let Some(rel) = rel_under(&dep, &include_dir, &include_can) else {
            debug!(dep = %dep.display(), "outside include dir; skipped");
            continue;
        };
        let rel = util::rel_path_string(&rel)?;
        if !seen.insert(rel.clone()) {
            continue;
        }
        let data = fs::read(&dep).map_err(|e| Error::io("read", &dep, e))?;
        util::write_bytes(&staged.join(&rel), &data)?;
        stats.files += 1;
        stats.bytes += data.len() as u64;
    }
    if stats.files == 0 {
        return Err(Error::external(format!(
            "{} reported no headers under {}",
            cfg.cc,
            include_dir.display()
        )));
    }

    materialize::promote(root, stage.path(), &[target.full_name()])?;
    info!(
        variant = %target,
        files = stats.files,
        bytes = stats.bytes,
        "fetched headers"
    );
    Ok(stats)
}
