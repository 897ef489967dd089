use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::layers::{LayerPlan, LayerSpec, default_layers};
use crate::target::{Os, Target, supported_targets};
use crate::util;

/// Headers that are textually identical across targets but sit in relative
/// include chains that assume every target keeps its own copy.
pub const DEFAULT_DONT_DEDUP: &[&str] = &[
    "libkern/OSAtomic.h",
    "libkern/OSAtomicDeprecated.h",
    "libkern/OSSpinLockDeprecated.h",
    "libkern/OSAtomicQueue.h",
];

pub const DEFAULT_FETCH_HEADERS: &[&str] = &[
    "assert.h",
    "ctype.h",
    "dirent.h",
    "dlfcn.h",
    "errno.h",
    "fcntl.h",
    "inttypes.h",
    "libkern/OSAtomic.h",
    "limits.h",
    "locale.h",
    "mach/mach.h",
    "math.h",
    "netdb.h",
    "netinet/in.h",
    "pthread.h",
    "sched.h",
    "setjmp.h",
    "signal.h",
    "stdio.h",
    "stdlib.h",
    "string.h",
    "sys/mman.h",
    "sys/socket.h",
    "sys/stat.h",
    "sys/time.h",
    "sys/types.h",
    "time.h",
    "unistd.h",
];

fn default_root() -> String {
    "headers".into()
}

fn default_os() -> String {
    "macos".into()
}

fn default_dont_dedup() -> Vec<String> {
    DEFAULT_DONT_DEDUP.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeadersConfig {
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_os")]
    pub os: String,
    /// Empty means every supported target.
    pub targets: Vec<Target>,
    #[serde(default = "default_dont_dedup")]
    pub dont_dedup: Vec<String>,
    /// Added on top of `dont_dedup` so the defaults need not be repeated.
    pub extra_dont_dedup: Vec<String>,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            os: default_os(),
            targets: Vec::new(),
            dont_dedup: default_dont_dedup(),
            extra_dont_dedup: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    pub name: Option<String>,
    pub output: Target,
    pub members: Vec<Target>,
}

fn default_cc() -> String {
    "cc".into()
}

fn default_include_prefix() -> String {
    "usr/include".into()
}

fn default_sdk_command() -> Vec<String> {
    vec!["xcrun".into(), "--show-sdk-path".into()]
}

fn default_version_command() -> Vec<String> {
    vec!["sw_vers".into(), "-productVersion".into()]
}

fn default_fetch_headers() -> Vec<String> {
    DEFAULT_FETCH_HEADERS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_cc")]
    pub cc: String,
    /// Explicit SDK root; when unset `sdk_command` is asked, and when that is
    /// empty too the host root `/` is used.
    pub sysroot: Option<String>,
    #[serde(default = "default_sdk_command")]
    pub sdk_command: Vec<String>,
    #[serde(default = "default_version_command")]
    pub version_command: Vec<String>,
    #[serde(default = "default_include_prefix")]
    pub include_prefix: String,
    #[serde(default = "default_fetch_headers")]
    pub headers: Vec<String>,
    pub extra_args: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cc: default_cc(),
            sysroot: None,
            sdk_command: default_sdk_command(),
            version_command: default_version_command(),
            include_prefix: default_include_prefix(),
            headers: default_fetch_headers(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HoistConfig {
    pub headers: HeadersConfig,
    pub layers: Vec<LayerConfig>,
    pub fetch: FetchConfig,
}

impl HoistConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        if let Some(tbl) = doc.value.as_table() {
            for key in tbl.keys() {
                if !matches!(key.as_str(), "headers" | "layers" | "fetch") {
                    return Err(Error::config(format!(
                        "unknown config table '{}' in {} (expected headers, layers, fetch)",
                        key,
                        doc.path.display()
                    )));
                }
            }
        }
        let cfg = Self {
            headers: doc.deserialize_path("headers")?.unwrap_or_default(),
            layers: doc.deserialize_path("layers")?.unwrap_or_default(),
            fetch: doc.deserialize_path("fetch")?.unwrap_or_default(),
        };
        cfg.dont_dedup()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_doc(&crate::config::load(path)?)
    }

    pub fn os(&self) -> Result<Os> {
        self.headers.os.parse()
    }

    pub fn targets(&self) -> Result<Vec<Target>> {
        let os = self.os()?;
        if self.headers.targets.is_empty() {
            return Ok(supported_targets(os));
        }
        if let Some(t) = self.headers.targets.iter().find(|t| t.os != os) {
            return Err(Error::config(format!(
                "target '{}' does not match headers.os '{}'",
                t,
                os.as_str()
            )));
        }
        Ok(self.headers.targets.clone())
    }

    /// Normalized exclusion set.
    pub fn dont_dedup(&self) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for raw in self
            .headers
            .dont_dedup
            .iter()
            .chain(&self.headers.extra_dont_dedup)
        {
            let rel = util::rel_path_string(Path::new(raw.trim()))
                .map_err(|e| Error::config(format!("invalid dont_dedup entry '{raw}': {e}")))?;
            out.insert(rel);
        }
        Ok(out)
    }

    /// Explicit `[[layers]]` when present, the default scheme otherwise.
    pub fn layer_plan(&self) -> Result<LayerPlan> {
        if self.layers.is_empty() {
            return default_layers(self.os()?, &self.targets()?);
        }
        let mut plan = LayerPlan::default();
        for l in &self.layers {
            plan.add(LayerSpec {
                name: l.name.clone().unwrap_or_else(|| l.output.full_name()),
                output: l.output,
                members: l.members.clone(),
            })?;
        }
        Ok(plan)
    }
}
