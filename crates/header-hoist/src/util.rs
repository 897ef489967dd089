use std::fs;
use std::path::{Component, Path};

use crate::error::{Error, ErrorKind, Result};

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p).map_err(|e| Error::io("create dir", p, e))
}

pub fn write_bytes(p: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = p.parent() {
        ensure_dir(parent)?;
    }
    fs::write(p, bytes).map_err(|e| Error::io("write", p, e))
}

pub fn write_json_pretty(p: &Path, v: &serde_json::Value) -> Result<()> {
    let s = serde_json::to_string_pretty(v)
        .map_err(|e| Error::new(ErrorKind::Io, format!("json encode error: {e}")))?;
    write_bytes(p, s.as_bytes())
}

/// Relative path with `/` separators, or an input error for names that are
/// not valid UTF-8 or that try to climb out of the tree.
pub fn rel_path_string(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for c in rel.components() {
        match c {
            Component::Normal(s) => {
                let Some(s) = s.to_str() else {
                    return Err(Error::input(format!(
                        "path '{}' is not valid UTF-8",
                        rel.display()
                    )));
                };
                parts.push(s);
            }
            Component::CurDir => {}
            _ => {
                return Err(Error::input(format!(
                    "path '{}' is not a plain relative path",
                    rel.display()
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::input("relative path is empty"));
    }
    Ok(parts.join("/"))
}
