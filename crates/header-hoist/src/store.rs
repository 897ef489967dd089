//! Per-layer content store and path index.
//!
//! Records live in a `Vec` arena and are referenced by [`RecordId`]. Both
//! structures are owned by one layer resolution and dropped with it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest of the length-prefixed path followed by the content. The path
    /// keeps equal bodies at different paths apart; the length prefix keeps
    /// `("a.h", "hX")` and `("a.hh", "X")` apart.
    pub fn compute(rel_path: &str, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((rel_path.len() as u64).to_le_bytes());
        hasher.update(rel_path.as_bytes());
        hasher.update(content);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for log lines.
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Strips space, tab, CR and LF from both ends. Interior bytes are untouched.
pub fn trim_content(bytes: &[u8]) -> &[u8] {
    let is_ws = |b: &u8| matches!(b, b' ' | b'\t' | b'\r' | b'\n');
    let Some(start) = bytes.iter().position(|b| !is_ws(b)) else {
        return &[];
    };
    let end = bytes.iter().rposition(|b| !is_ws(b)).map_or(start, |e| e + 1);
    &bytes[start..end]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(usize);

#[derive(Debug, Clone)]
pub struct ContentRecord {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub hit_count: usize,
    pub is_generic: bool,
}

impl ContentRecord {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct ContentStore {
    records: Vec<ContentRecord>,
    by_fingerprint: HashMap<Fingerprint, RecordId>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<RecordId> {
        self.by_fingerprint.get(fingerprint).copied()
    }

    /// Inserts a fresh record or bumps the hit count of an existing one.
    /// Returns the record id and whether it already existed.
    pub fn observe(&mut self, fingerprint: Fingerprint, bytes: &[u8]) -> (RecordId, bool) {
        if let Some(id) = self.lookup(&fingerprint) {
            self.records[id.0].hit_count += 1;
            return (id, true);
        }
        let id = RecordId(self.records.len());
        self.records.push(ContentRecord {
            bytes: bytes.to_vec(),
            fingerprint,
            hit_count: 1,
            is_generic: false,
        });
        self.by_fingerprint.insert(fingerprint, id);
        (id, false)
    }

    pub fn get(&self, id: RecordId) -> &ContentRecord {
        &self.records[id.0]
    }

    /// Promotes a record to generic. A record is promoted at most once.
    pub fn mark_generic(&mut self, id: RecordId) -> Result<()> {
        let rec = &mut self.records[id.0];
        if rec.is_generic {
            return Err(Error::integrity(format!(
                "record {} promoted to generic twice",
                rec.fingerprint
            )));
        }
        rec.is_generic = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.iter()
    }
}

/// One target's observation of a path. `member` indexes the layer's member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEntry {
    pub member: usize,
    pub record: RecordId,
}

#[derive(Debug, Default)]
pub struct PathIndex {
    paths: BTreeMap<String, Vec<PathEntry>>,
}

/// Outcome of [`PathIndex::check`] for a (member, path) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Vacant,
    SameRecord,
    Conflict(RecordId),
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, rel_path: &str, member: usize, fingerprint: &Fingerprint, store: &ContentStore) -> Slot {
        let Some(entries) = self.paths.get(rel_path) else {
            return Slot::Vacant;
        };
        match entries.iter().find(|e| e.member == member) {
            None => Slot::Vacant,
            Some(e) if store.get(e.record).fingerprint == *fingerprint => Slot::SameRecord,
            Some(e) => Slot::Conflict(e.record),
        }
    }

    /// Put-if-absent: a member that already recorded this path keeps its
    /// first entry. Callers run [`PathIndex::check`] first.
    pub fn insert(&mut self, rel_path: &str, member: usize, record: RecordId) {
        let entries = self.paths.entry(rel_path.to_string()).or_default();
        if entries.iter().any(|e| e.member == member) {
            return;
        }
        entries.push(PathEntry { member, record });
    }

    pub fn get(&self, rel_path: &str) -> Option<&[PathEntry]> {
        self.paths.get(rel_path).map(Vec::as_slice)
    }

    /// Paths in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PathEntry])> {
        self.paths.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
