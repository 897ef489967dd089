//! Layer specs as data, their dependency order, and the plan runner.
//!
//! A layer depends on every other layer whose output it lists as a member.
//! The default scheme is derived from the target enumeration:
//! per (arch, major version) across minor releases and ABIs, then per major
//! version across arches, then one top layer for the whole OS. Groups with a
//! single member are skipped and the member is fed straight to the next level.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::error::{Error, Result};
use crate::report::RunReport;
use crate::resolver::{ResolveOptions, resolve_layer};
use crate::target::{Abi, Arch, Os, OsVersion, Target};
use crate::workspace::HeaderRoot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSpec {
    pub name: String,
    pub output: Target,
    pub members: Vec<Target>,
}

#[derive(Debug, Default)]
pub struct LayerPlan {
    layers: Vec<LayerSpec>,
}

impl LayerPlan {
    pub fn add(&mut self, spec: LayerSpec) -> Result<()> {
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::config("layer name is empty"));
        }
        if spec.members.len() < 2 {
            return Err(Error::config(format!(
                "layer '{}' needs at least two members to compare",
                name
            )));
        }
        let mut seen = BTreeSet::new();
        for m in &spec.members {
            if !seen.insert(*m) {
                return Err(Error::config(format!(
                    "layer '{}' lists member '{}' twice",
                    name, m
                )));
            }
            if *m == spec.output {
                return Err(Error::config(format!(
                    "layer '{}' cannot consume its own output '{}'",
                    name, m
                )));
            }
        }
        for existing in &self.layers {
            if existing.name == name {
                return Err(Error::config(format!("duplicate layer name '{}'", name)));
            }
            if existing.output == spec.output {
                return Err(Error::config(format!(
                    "output '{}' is produced by both '{}' and '{}'",
                    spec.output, existing.name, name
                )));
            }
            if let Some(m) = existing.members.iter().find(|m| spec.members.contains(m)) {
                return Err(Error::config(format!(
                    "target '{}' is consumed by both '{}' and '{}'",
                    m, existing.name, name
                )));
            }
        }
        self.layers.push(LayerSpec { name, ..spec });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers.iter()
    }

    pub fn get(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.name == name)
    }

    fn producers(&self) -> BTreeMap<Target, usize> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, l)| (l.output, i))
            .collect()
    }

    /// Layers in dependency order; independent layers keep declaration order.
    pub fn ordered(&self) -> Result<Vec<&LayerSpec>> {
        let producers = self.producers();

        let mut incoming = vec![0usize; self.layers.len()];
        let mut outgoing: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.layers.len()];
        for (i, layer) in self.layers.iter().enumerate() {
            for m in &layer.members {
                if let Some(&dep) = producers.get(m) {
                    if outgoing[dep].insert(i) {
                        incoming[i] += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.layers.len())
            .filter(|&i| incoming[i] == 0)
            .collect();
        let mut out = Vec::with_capacity(self.layers.len());
        while let Some(n) = ready.pop_first() {
            out.push(&self.layers[n]);
            for &m in &outgoing[n] {
                incoming[m] -= 1;
                if incoming[m] == 0 {
                    ready.insert(m);
                }
            }
        }

        if out.len() != self.layers.len() {
            let remaining: Vec<&str> = self
                .layers
                .iter()
                .enumerate()
                .filter_map(|(i, l)| (incoming[i] > 0).then_some(l.name.as_str()))
                .collect();
            return Err(Error::config(format!(
                "layer graph contains a cycle; remaining layers: {}",
                remaining.join(", ")
            )));
        }
        Ok(out)
    }

    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph layers {\n  rankdir=BT;\n");
        for layer in &self.layers {
            out.push_str(&format!(
                "  \"{}\" [shape=box, label=\"{}\\n-> {}\"];\n",
                layer.name, layer.name, layer.output
            ));
        }
        let producers = self.producers();
        for layer in &self.layers {
            for m in &layer.members {
                match producers.get(m) {
                    Some(&dep) => out.push_str(&format!(
                        "  \"{}\" -> \"{}\";\n",
                        self.layers[dep].name, layer.name
                    )),
                    None => out.push_str(&format!("  \"{}\" -> \"{}\";\n", m, layer.name)),
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Builds the three-level scheme for `targets`.
pub fn default_layers(os: Os, targets: &[Target]) -> Result<LayerPlan> {
    let mut plan = LayerPlan::default();

    // Level 1: every release and ABI of one (arch, major version).
    let mut by_arch_version: BTreeMap<(OsVersion, Arch), Vec<Target>> = BTreeMap::new();
    for t in targets.iter().filter(|t| t.os == os) {
        by_arch_version
            .entry((t.version.major_only(), t.arch))
            .or_default()
            .push(*t);
    }
    let mut by_version: BTreeMap<OsVersion, Vec<Target>> = BTreeMap::new();
    for ((version, arch), members) in by_arch_version {
        let fed = if members.len() > 1 {
            let output = Target::new(arch, os, version, Abi::Any);
            plan.add(LayerSpec {
                name: output.full_name(),
                output,
                members,
            })?;
            output
        } else {
            members[0]
        };
        by_version.entry(version).or_default().push(fed);
    }

    // Level 2: one major version across arches.
    let top = Target::wildcard(os);
    let mut top_members = Vec::new();
    for (version, members) in by_version {
        if version == OsVersion::Any || members.len() < 2 {
            top_members.extend(members);
            continue;
        }
        let output = Target::generic(Arch::Any, os, version);
        plan.add(LayerSpec {
            name: output.full_name(),
            output,
            members,
        })?;
        top_members.push(output);
    }

    // Level 3: everything for this OS.
    top_members.retain(|t| *t != top);
    if top_members.len() > 1 {
        plan.add(LayerSpec {
            name: top.full_name(),
            output: top,
            members: top_members,
        })?;
    }
    Ok(plan)
}

/// Resolves every layer in order, carrying outputs forward. Stops at the first
/// failure so a later layer never reads a half-written tree.
pub fn run_plan(root: &HeaderRoot, plan: &LayerPlan, opts: ResolveOptions<'_>) -> Result<RunReport> {
    let mut report = RunReport::new(root.path(), opts.dry_run);
    let ordered = plan.ordered()?;
    for (i, layer) in ordered.iter().enumerate() {
        info!(
            layer = %layer.name,
            step = i + 1,
            of = ordered.len(),
            "resolving layer"
        );
        let outcome = resolve_layer(root, layer, opts)?;
        report.layers.push(outcome.report);
    }
    info!(
        layers = report.layers.len(),
        bytes_scanned = report.bytes_scanned(),
        bytes_reclaimed = report.bytes_reclaimed(),
        dry_run = opts.dry_run,
        "all layers resolved"
    );
    Ok(report)
}
