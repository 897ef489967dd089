//! Target identity: one (architecture, OS, OS version, ABI) header-set variant.
//!
//! Directory names on disk are full names (`x86_64-macos.11-none`,
//! `any-macos.11-any`, `any-macos-any`) and parse back into the same value.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    Any,
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::Any => "any",
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "any" => Ok(Arch::Any),
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            other => Err(Error::config(format!("unsupported architecture '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
    Macos,
}

impl Os {
    pub fn as_str(self) -> &'static str {
        match self {
            Os::Macos => "macos",
        }
    }
}

impl FromStr for Os {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "macos" => Ok(Os::Macos),
            other => Err(Error::config(format!("unsupported os '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OsVersion {
    Any,
    Release { major: u32, minor: Option<u32> },
}

impl OsVersion {
    pub const fn major(major: u32) -> Self {
        OsVersion::Release { major, minor: None }
    }

    /// Drops the minor component: `13.4` -> `13`.
    pub fn major_only(self) -> Self {
        match self {
            OsVersion::Any => OsVersion::Any,
            OsVersion::Release { major, .. } => OsVersion::major(major),
        }
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsVersion::Any => f.write_str("any"),
            OsVersion::Release { major, minor: None } => write!(f, "{major}"),
            OsVersion::Release {
                major,
                minor: Some(minor),
            } => write!(f, "{major}.{minor}"),
        }
    }
}

impl FromStr for OsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "any" {
            return Ok(OsVersion::Any);
        }
        let bad = || Error::config(format!("invalid os version '{s}'"));
        let (major, minor) = match s.split_once('.') {
            Some((a, b)) => (a, Some(b)),
            None => (s, None),
        };
        let major = major.parse::<u32>().map_err(|_| bad())?;
        let minor = minor
            .map(|m| m.parse::<u32>().map_err(|_| bad()))
            .transpose()?;
        Ok(OsVersion::Release { major, minor })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Abi {
    Any,
    None,
}

impl Abi {
    pub fn as_str(self) -> &'static str {
        match self {
            Abi::Any => "any",
            Abi::None => "none",
        }
    }
}

impl FromStr for Abi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "any" => Ok(Abi::Any),
            "none" => Ok(Abi::None),
            other => Err(Error::config(format!("unsupported abi '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    pub arch: Arch,
    pub os: Os,
    pub version: OsVersion,
    pub abi: Abi,
}

impl Target {
    pub const fn new(arch: Arch, os: Os, version: OsVersion, abi: Abi) -> Self {
        Self {
            arch,
            os,
            version,
            abi,
        }
    }

    /// The "anything for this OS" target: `any-<os>-any`.
    pub const fn wildcard(os: Os) -> Self {
        Self::new(Arch::Any, os, OsVersion::Any, Abi::Any)
    }

    /// Synthetic output of a layer projecting onto `arch` and `version`.
    pub const fn generic(arch: Arch, os: Os, version: OsVersion) -> Self {
        Self::new(arch, os, version, Abi::Any)
    }

    pub fn short_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.arch.as_str(),
            self.os.as_str(),
            self.abi.as_str()
        )
    }

    pub fn full_name(&self) -> String {
        match self.version {
            OsVersion::Any => self.short_name(),
            v => format!(
                "{}-{}.{}-{}",
                self.arch.as_str(),
                self.os.as_str(),
                v,
                self.abi.as_str()
            ),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

static TARGET_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9_]+)-([a-z]+)(?:\.([0-9]+(?:\.[0-9]+)?))?-([a-z]+)$")
        .expect("target name regex")
});

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(caps) = TARGET_NAME_RE.captures(s) else {
            return Err(Error::config(format!(
                "invalid target name '{s}' (expected <arch>-<os>[.<version>]-<abi>)"
            )));
        };
        let version = match caps.get(3) {
            Some(v) => v.as_str().parse()?,
            None => OsVersion::Any,
        };
        Ok(Target {
            arch: caps[1].parse()?,
            os: caps[2].parse()?,
            version,
            abi: caps[4].parse()?,
        })
    }
}

impl TryFrom<String> for Target {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.full_name()
    }
}

pub const SUPPORTED_ARCHS: &[Arch] = &[Arch::X86_64, Arch::Aarch64];

pub const SUPPORTED_VERSIONS: &[OsVersion] = &[
    OsVersion::major(11),
    OsVersion::major(12),
    OsVersion::major(13),
    OsVersion::major(14),
];

/// Every concrete target the default configuration knows how to fetch.
pub fn supported_targets(os: Os) -> Vec<Target> {
    let mut out = Vec::with_capacity(SUPPORTED_ARCHS.len() * SUPPORTED_VERSIONS.len());
    for &version in SUPPORTED_VERSIONS {
        for &arch in SUPPORTED_ARCHS {
            out.push(Target::new(arch, os, version, Abi::None));
        }
    }
    out
}
